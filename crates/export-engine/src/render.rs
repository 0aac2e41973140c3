//! Frame and audio producers consumed by the export pipeline.

use snapcut_common::error::SnapcutResult;
use snapcut_export_model::{ExportSettings, ProjectSnapshot};

use crate::pool::BitmapPool;

/// A rendered RGBA frame, 4 bytes per pixel, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaFrame {
    /// Fully transparent black frame.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    /// Frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut frame = Self::blank(width, height);
        frame.fill(rgba);
        frame
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }
}

/// Produces the picture at a timeline position.
///
/// Must be deterministic for a given project and timestamp. `Ok(None)`
/// means there is nothing to show (a gap); the frame is skipped but timing
/// keeps advancing. `Err` aborts the export.
pub trait FrameRenderer: Send {
    fn render_frame(
        &mut self,
        project: &ProjectSnapshot,
        timestamp_ms: u64,
        pool: &mut BitmapPool,
    ) -> SnapcutResult<Option<RgbaFrame>>;

    /// Renderer name, for logs.
    fn name(&self) -> &str;
}

/// Produces interleaved signed 16-bit PCM.
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Read `frames` sample frames starting at `pts_us`. `Ok(None)` once exhausted.
    fn read(&mut self, pts_us: i64, frames: usize) -> SnapcutResult<Option<Vec<i16>>>;
}

/// Creates the producers for one export.
pub trait RendererProvider: Send + Sync {
    fn renderer(
        &self,
        project: &ProjectSnapshot,
        settings: &ExportSettings,
    ) -> SnapcutResult<Box<dyn FrameRenderer>>;

    /// Audio for the project, if it has any.
    fn audio_source(
        &self,
        project: &ProjectSnapshot,
        settings: &ExportSettings,
    ) -> Option<Box<dyn AudioSource>>;
}

/// Synthetic picture content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    Solid([u8; 4]),
    /// Seven vertical colour bars that scroll one bar width per second.
    Bars,
}

const BAR_COLOURS: [[u8; 4]; 7] = [
    [192, 192, 192, 255],
    [192, 192, 0, 255],
    [0, 192, 192, 255],
    [0, 192, 0, 255],
    [192, 0, 192, 255],
    [192, 0, 0, 255],
    [0, 0, 192, 255],
];

/// Renders a [`TestPattern`] at a fixed size.
#[derive(Debug, Clone)]
pub struct TestPatternRenderer {
    pattern: TestPattern,
    width: u32,
    height: u32,
}

impl TestPatternRenderer {
    pub fn new(pattern: TestPattern, width: u32, height: u32) -> Self {
        Self {
            pattern,
            width,
            height,
        }
    }
}

impl FrameRenderer for TestPatternRenderer {
    fn render_frame(
        &mut self,
        _project: &ProjectSnapshot,
        timestamp_ms: u64,
        pool: &mut BitmapPool,
    ) -> SnapcutResult<Option<RgbaFrame>> {
        let mut frame = pool.acquire(self.width, self.height);
        match self.pattern {
            TestPattern::Solid(rgba) => frame.fill(rgba),
            TestPattern::Bars => {
                let width = self.width.max(1) as u64;
                let bar_width = (width / BAR_COLOURS.len() as u64).max(1);
                let shift = bar_width * timestamp_ms / 1000;
                for row in frame.data.chunks_exact_mut(self.width as usize * 4) {
                    for (col, px) in row.chunks_exact_mut(4).enumerate() {
                        let bar = ((col as u64 + shift) / bar_width) as usize % BAR_COLOURS.len();
                        px.copy_from_slice(&BAR_COLOURS[bar]);
                    }
                }
            }
        }
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        match self.pattern {
            TestPattern::Solid(_) => "solid",
            TestPattern::Bars => "bars",
        }
    }
}

/// Endless digital silence.
#[derive(Debug, Clone)]
pub struct SilenceSource {
    sample_rate: u32,
    channels: u16,
}

impl SilenceSource {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl AudioSource for SilenceSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn read(&mut self, _pts_us: i64, frames: usize) -> SnapcutResult<Option<Vec<i16>>> {
        Ok(Some(vec![0i16; frames * self.channels as usize]))
    }
}

/// Provides a [`TestPatternRenderer`] sized to the export and, optionally, silence.
#[derive(Debug, Clone)]
pub struct TestPatternProvider {
    pattern: TestPattern,
    with_audio: bool,
}

impl TestPatternProvider {
    pub fn new(pattern: TestPattern, with_audio: bool) -> Self {
        Self {
            pattern,
            with_audio,
        }
    }
}

impl RendererProvider for TestPatternProvider {
    fn renderer(
        &self,
        _project: &ProjectSnapshot,
        settings: &ExportSettings,
    ) -> SnapcutResult<Box<dyn FrameRenderer>> {
        Ok(Box::new(TestPatternRenderer::new(
            self.pattern,
            settings.resolution.width,
            settings.resolution.height,
        )))
    }

    fn audio_source(
        &self,
        _project: &ProjectSnapshot,
        settings: &ExportSettings,
    ) -> Option<Box<dyn AudioSource>> {
        self.with_audio.then(|| {
            Box::new(SilenceSource::new(
                settings.audio_sample_rate_hz,
                settings.audio_channels,
            )) as Box<dyn AudioSource>
        })
    }
}
