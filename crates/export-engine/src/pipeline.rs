//! Export pipeline: render, convert, encode, and mux one project.
//!
//! [`ExportPipeline::run`] is the error boundary of an export. Whatever
//! happens inside, the caller sees an ordered progress sequence that ends in
//! exactly one terminal event, and every encoder and muxer has been released
//! before that event is emitted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use snapcut_common::clock::{estimate_remaining_ms, FrameClock, Stopwatch};
use snapcut_common::config::EngineConfig;
use snapcut_common::error::{SnapcutError, SnapcutResult};
use snapcut_export_model::{percent_of, ExportProgress, ExportSettings, ProjectSnapshot};

use crate::codec::{MediaBackend, MediaFormat, TrackKind};
use crate::encoder::{DrainEvent, DrainSummary, EncoderSession};
use crate::muxer::MuxerSession;
use crate::pixel::{PixelConverter, PixelFormat};
use crate::pool::{BitmapPool, FrameKey, FramePool};
use crate::render::{AudioSource, FrameRenderer};

/// Sample frames per audio input buffer.
pub const AUDIO_CHUNK_FRAMES: usize = 1024;

/// Input-buffer retries (each with a drain in between) before giving up.
const MAX_SUBMIT_ATTEMPTS: u32 = 500;

/// Highest percentage reported before the export has completed.
const MAX_PENDING_PERCENT: f32 = 99.0;

/// One export to perform.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub project: ProjectSnapshot,
    pub settings: ExportSettings,
    pub output_path: PathBuf,
}

/// Figures about a finished export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub output_path: PathBuf,
    pub total_frames: u64,
    /// Frames handed to the video encoder (gaps excluded).
    pub frames_encoded: u64,
    /// Samples written to the container across all tracks.
    pub samples_written: u64,
    pub has_audio: bool,
    pub elapsed_ms: u64,
}

/// How an export ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed(ExportSummary),
    Cancelled { frames_processed: u64 },
    Failed { message: String },
}

/// Emits progress events and refuses to emit after a terminal one.
struct ProgressReporter<'a> {
    callback: &'a dyn Fn(ExportProgress),
    stopwatch: Stopwatch,
    total_frames: u64,
    current_frame: u64,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    fn new(callback: &'a dyn Fn(ExportProgress)) -> Self {
        Self {
            callback,
            stopwatch: Stopwatch::start(),
            total_frames: 0,
            current_frame: 0,
            finished: false,
        }
    }

    fn emit(&mut self, progress: ExportProgress) {
        if self.finished {
            return;
        }
        self.finished = progress.is_terminal();
        (self.callback)(progress);
    }

    fn preparing(&mut self) {
        let progress = ExportProgress::preparing(self.total_frames);
        self.emit(progress);
    }

    fn encoding(&mut self, current_frame: u64) {
        self.current_frame = current_frame;
        let percent = percent_of(current_frame, self.total_frames);
        let elapsed = self.stopwatch.elapsed_ms();
        let remaining = estimate_remaining_ms(elapsed, percent as f64);
        let progress = ExportProgress::encoding(
            current_frame,
            self.total_frames,
            percent.min(MAX_PENDING_PERCENT),
            elapsed,
            remaining,
        );
        self.emit(progress);
    }

    fn finalizing(&mut self) {
        let progress = ExportProgress::finalizing(
            self.current_frame,
            self.total_frames,
            self.stopwatch.elapsed_ms(),
        );
        self.emit(progress);
    }

    fn completed(&mut self) {
        self.current_frame = self.total_frames;
        let progress = ExportProgress::completed(self.total_frames, self.stopwatch.elapsed_ms());
        self.emit(progress);
    }

    fn cancelled(&mut self) {
        let progress = ExportProgress::cancelled(
            self.current_frame,
            self.total_frames,
            self.stopwatch.elapsed_ms(),
        );
        self.emit(progress);
    }

    fn error(&mut self, message: &str) {
        let progress = ExportProgress::error(
            self.current_frame,
            self.total_frames,
            self.stopwatch.elapsed_ms(),
            message,
        );
        self.emit(progress);
    }
}

/// Audio encoder plus the source feeding it.
struct AudioTrack {
    session: EncoderSession,
    source: Box<dyn AudioSource>,
    sample_rate: u32,
    channels: u16,
    frames_sent: u64,
    exhausted: bool,
}

impl AudioTrack {
    fn presentation_time_us(&self) -> i64 {
        (self.frames_sent * 1_000_000 / self.sample_rate as u64) as i64
    }

    /// Feed audio until the encoder input reaches `until_us`.
    fn pump(&mut self, until_us: i64, muxer: &mut MuxerSession) -> SnapcutResult<()> {
        while !self.exhausted {
            let pts = self.presentation_time_us();
            if pts >= until_us {
                break;
            }
            let remaining_us = (until_us - pts) as u64;
            let wanted = (remaining_us * self.sample_rate as u64).div_ceil(1_000_000) as usize;
            let frames = wanted.clamp(1, AUDIO_CHUNK_FRAMES);

            let Some(samples) = self.source.read(pts, frames)? else {
                self.exhausted = true;
                break;
            };
            let produced = samples.len() / self.channels as usize;
            if produced == 0 {
                self.exhausted = true;
                break;
            }
            let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            submit_with_retry(&mut self.session, muxer, |s| s.submit_frame(&bytes, pts))?;
            self.frames_sent += produced as u64;
            drain_into(&mut self.session, muxer, false)?;
        }
        Ok(())
    }
}

/// Everything an export must release on the way out.
struct ExportResources {
    video: EncoderSession,
    audio: Option<AudioTrack>,
    muxer: MuxerSession,
}

impl ExportResources {
    fn release(&mut self) {
        self.video.release();
        if let Some(audio) = self.audio.as_mut() {
            audio.session.release();
        }
        self.muxer.release();
    }
}

impl Drop for ExportResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// Forward one drain pass into the muxer, registering the track and starting
/// the container when the last expected format shows up.
fn drain_into(
    session: &mut EncoderSession,
    muxer: &mut MuxerSession,
    blocking: bool,
) -> SnapcutResult<DrainSummary> {
    session.drain(
        blocking,
        &mut |event: DrainEvent<'_>| -> SnapcutResult<Option<usize>> {
            match event {
                DrainEvent::FormatAvailable(format) => {
                    let index = muxer.add_track(format)?;
                    if muxer.is_ready() {
                        muxer.start()?;
                    }
                    Ok(Some(index))
                }
                DrainEvent::Unit(unit) => {
                    muxer.push(&unit)?;
                    Ok(None)
                }
            }
        },
    )
}

/// Retry `attempt` until the encoder accepts input, draining in between so
/// output buffers free up.
fn submit_with_retry(
    session: &mut EncoderSession,
    muxer: &mut MuxerSession,
    mut attempt: impl FnMut(&mut EncoderSession) -> SnapcutResult<bool>,
) -> SnapcutResult<()> {
    for _ in 0..MAX_SUBMIT_ATTEMPTS {
        if attempt(session)? {
            return Ok(());
        }
        drain_into(session, muxer, false)?;
    }
    Err(SnapcutError::encoder(format!(
        "{} encoder accepted no input after {MAX_SUBMIT_ATTEMPTS} attempts",
        session.kind()
    )))
}

/// Queue end of stream and flush everything the encoder still holds.
fn flush_encoder(session: &mut EncoderSession, muxer: &mut MuxerSession) -> SnapcutResult<()> {
    submit_with_retry(session, muxer, EncoderSession::signal_end_of_stream)?;
    let summary = drain_into(session, muxer, true)?;
    tracing::debug!(
        track = %session.kind(),
        units = summary.units,
        "Encoder flushed"
    );
    Ok(())
}

enum Flow {
    Completed(ExportSummary),
    Cancelled,
}

/// Drives one export at a time.
pub struct ExportPipeline {
    backend: Arc<dyn MediaBackend>,
    engine: EngineConfig,
    converter: PixelConverter,
    frame_pool: FramePool,
    bitmap_pool: BitmapPool,
}

impl ExportPipeline {
    pub fn new(backend: Arc<dyn MediaBackend>, engine: EngineConfig) -> Self {
        let frame_pool = FramePool::new(engine.frame_buffer_capacity());
        let bitmap_pool = BitmapPool::new(engine.bitmap_pool_budget_bytes);
        Self {
            backend,
            engine,
            converter: PixelConverter,
            frame_pool,
            bitmap_pool,
        }
    }

    pub fn frame_pool(&self) -> &FramePool {
        &self.frame_pool
    }

    pub fn bitmap_pool(&self) -> &BitmapPool {
        &self.bitmap_pool
    }

    /// Run one export to completion, cancellation, or failure.
    ///
    /// Never returns an error: failures become a single `Error` progress event.
    pub fn run(
        &mut self,
        request: &ExportRequest,
        renderer: &mut dyn FrameRenderer,
        audio: Option<Box<dyn AudioSource>>,
        cancel: &AtomicBool,
        progress: &dyn Fn(ExportProgress),
    ) -> ExportOutcome {
        let mut reporter = ProgressReporter::new(progress);
        tracing::info!(
            project = %request.project.name,
            output = %request.output_path.display(),
            resolution = %request.settings.resolution,
            codec = request.settings.video_codec.as_str(),
            container = request.settings.container_format.file_extension(),
            "Starting export"
        );

        let outcome = match self.execute(request, renderer, audio, cancel, &mut reporter) {
            Ok(Flow::Completed(summary)) => {
                tracing::info!(
                    output = %summary.output_path.display(),
                    frames = summary.total_frames,
                    samples = summary.samples_written,
                    elapsed_ms = summary.elapsed_ms,
                    "Export complete"
                );
                reporter.completed();
                ExportOutcome::Completed(summary)
            }
            Ok(Flow::Cancelled) => {
                tracing::info!(frame = reporter.current_frame, "Export cancelled");
                reporter.cancelled();
                ExportOutcome::Cancelled {
                    frames_processed: reporter.current_frame,
                }
            }
            Err(e) => {
                let message = e.to_string();
                if e.is_setup() {
                    tracing::error!(error = %message, "Export setup failed");
                } else {
                    tracing::error!(frame = reporter.current_frame, error = %message, "Export failed");
                }
                reporter.error(&message);
                ExportOutcome::Failed { message }
            }
        };
        self.release_pooled_buffers();
        outcome
    }

    /// Drop every buffer the pools retained. Counters survive for inspection.
    fn release_pooled_buffers(&mut self) {
        let frames = self.frame_pool.stats();
        let bitmaps = self.bitmap_pool.stats();
        self.frame_pool.clear();
        self.bitmap_pool.clear();
        tracing::debug!(
            frame_bytes = frames.retained_bytes,
            bitmap_bytes = bitmaps.retained_bytes,
            "Released pooled buffers"
        );
    }

    fn execute(
        &mut self,
        request: &ExportRequest,
        renderer: &mut dyn FrameRenderer,
        audio_source: Option<Box<dyn AudioSource>>,
        cancel: &AtomicBool,
        reporter: &mut ProgressReporter<'_>,
    ) -> SnapcutResult<Flow> {
        let settings = &request.settings;
        settings
            .validate()
            .map_err(|e| SnapcutError::unsupported(e.to_string()))?;

        request
            .project
            .validate()
            .map_err(|e| SnapcutError::unsupported(e.to_string()))?;

        let clock = FrameClock::new(settings.frame_rate);
        reporter.total_frames = clock
            .total_frames(request.project.duration_ms)
            .ok_or_else(|| {
                SnapcutError::unsupported(format!(
                    "{}ms at {} fps overflows the frame count",
                    request.project.duration_ms, settings.frame_rate
                ))
            })?;

        let mut resources = self.prepare(request, audio_source)?;
        reporter.preparing();

        let key = FrameKey::new(
            settings.resolution.width,
            settings.resolution.height,
            PixelFormat::Yuv420SemiPlanar,
        );
        let mut frames_encoded = 0u64;

        for frame in 0..reporter.total_frames {
            if cancel.load(Ordering::Acquire) {
                resources.release();
                return Ok(Flow::Cancelled);
            }

            let timestamp_ms = clock.timestamp_ms(frame);
            let pts = clock.presentation_time_us(frame);
            let rendered = renderer
                .render_frame(&request.project, timestamp_ms, &mut self.bitmap_pool)
                .map_err(|e| {
                    SnapcutError::render(format!("frame {frame} at {timestamp_ms}ms: {e}"))
                })?;

            if let Some(rgba) = rendered {
                if (rgba.width, rgba.height) != (key.width, key.height) {
                    return Err(SnapcutError::render(format!(
                        "{} rendered {}x{} for a {} export",
                        renderer.name(),
                        rgba.width,
                        rgba.height,
                        settings.resolution
                    )));
                }
                let mut yuv = self.frame_pool.acquire(key);
                let converted = self
                    .converter
                    .convert_into(rgba.width, rgba.height, &rgba.data, &mut yuv);
                self.bitmap_pool.release(rgba);
                converted?;

                let ExportResources { video, muxer, .. } = &mut resources;
                submit_with_retry(video, muxer, |s| s.submit_frame(&yuv, pts))?;
                self.frame_pool.release(key, yuv);
                drain_into(video, muxer, false)?;
                frames_encoded += 1;
            } else {
                tracing::trace!(frame, timestamp_ms, "Renderer returned a gap");
            }

            if let Some(audio) = resources.audio.as_mut() {
                let until = clock.presentation_time_us(frame + 1);
                audio.pump(until, &mut resources.muxer)?;
            }

            reporter.encoding(frame + 1);
        }

        reporter.finalizing();
        let summary = self.finalize(&mut resources, request, reporter, frames_encoded)?;
        resources.release();
        Ok(Flow::Completed(summary))
    }

    /// Create encoders and the muxer. Audio problems only downgrade the export.
    fn prepare(
        &self,
        request: &ExportRequest,
        audio_source: Option<Box<dyn AudioSource>>,
    ) -> SnapcutResult<ExportResources> {
        let settings = &request.settings;
        let timeout = self.engine.dequeue_timeout();

        let video_format = MediaFormat::video(
            settings.video_codec.mime_type(),
            settings.resolution.width,
            settings.resolution.height,
            settings.frame_rate,
            settings.video_bitrate_bps(),
        );
        let mut video = EncoderSession::create(
            self.backend.as_ref(),
            &video_format,
            settings.hardware_acceleration,
            timeout,
        )?;
        video.configure(&video_format)?;
        video.start()?;

        let audio = audio_source.and_then(|source| self.prepare_audio(settings, source));
        if audio.is_none() {
            tracing::warn!("Exporting without an audio track");
        }

        if let Some(parent) = request
            .output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        let writer = self
            .backend
            .create_container(&request.output_path, settings.container_format)
            .map_err(|e| SnapcutError::setup(format!("cannot create container: {e}")))?;
        let muxer = MuxerSession::new(writer, &request.output_path, audio.is_some());

        Ok(ExportResources {
            video,
            audio,
            muxer,
        })
    }

    fn prepare_audio(
        &self,
        settings: &ExportSettings,
        source: Box<dyn AudioSource>,
    ) -> Option<AudioTrack> {
        if source.sample_rate() != settings.audio_sample_rate_hz
            || source.channels() != settings.audio_channels
        {
            tracing::warn!(
                source_rate = source.sample_rate(),
                source_channels = source.channels(),
                "Audio source layout does not match export settings"
            );
            return None;
        }
        let format = MediaFormat::audio(
            settings.audio_codec.mime_type(),
            settings.audio_sample_rate_hz,
            settings.audio_channels,
            settings.audio_bitrate_bps(),
        );
        let session = EncoderSession::create(
            self.backend.as_ref(),
            &format,
            settings.hardware_acceleration,
            self.engine.dequeue_timeout(),
        )
        .and_then(|mut session| {
            session.configure(&format)?;
            session.start()?;
            Ok(session)
        });
        match session {
            Ok(session) => Some(AudioTrack {
                session,
                source,
                sample_rate: settings.audio_sample_rate_hz,
                channels: settings.audio_channels,
                frames_sent: 0,
                exhausted: false,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Audio encoder unavailable");
                None
            }
        }
    }

    fn finalize(
        &mut self,
        resources: &mut ExportResources,
        request: &ExportRequest,
        reporter: &ProgressReporter<'_>,
        frames_encoded: u64,
    ) -> SnapcutResult<ExportSummary> {
        let ExportResources {
            video,
            audio,
            muxer,
        } = resources;

        flush_encoder(video, muxer)?;
        if let Some(audio) = audio.as_mut() {
            let duration_us = request
                .project
                .duration_ms
                .checked_mul(1000)
                .and_then(|us| i64::try_from(us).ok())
                .ok_or_else(|| {
                    SnapcutError::unsupported(format!(
                        "{}ms does not fit in a microsecond timestamp",
                        request.project.duration_ms
                    ))
                })?;
            audio.pump(duration_us, muxer)?;
            flush_encoder(&mut audio.session, muxer)?;
        }

        if !muxer.is_started() && muxer.pending_len() > 0 {
            return Err(SnapcutError::muxer(format!(
                "{} samples buffered but not every track reported a format",
                muxer.pending_len()
            )));
        }

        video.stop()?;
        if let Some(audio) = audio.as_mut() {
            audio.session.stop()?;
        }
        muxer.stop()?;

        let has_audio = audio.as_ref().is_some_and(|a| a.session.track_index().is_some());
        if video.track_index().is_none() {
            tracing::debug!("Video encoder never reported a format");
        }
        tracing::debug!(
            frame_pool = ?self.frame_pool.stats(),
            bitmap_pool = ?self.bitmap_pool.stats(),
            audio_track = has_audio,
            "Pool usage"
        );

        Ok(ExportSummary {
            output_path: request.output_path.clone(),
            total_frames: reporter.total_frames,
            frames_encoded,
            samples_written: muxer.samples_written(),
            has_audio,
            elapsed_ms: reporter.stopwatch.elapsed_ms(),
        })
    }
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("backend", &self.backend.name())
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryBackendOptions};
    use crate::render::{SilenceSource, TestPattern, TestPatternRenderer};
    use snapcut_export_model::{ExportStatus, Resolution};
    use std::sync::Mutex;

    fn request(name: &str, duration_ms: u64, fps: u32) -> ExportRequest {
        ExportRequest {
            project: ProjectSnapshot::new(name, duration_ms),
            settings: ExportSettings {
                resolution: Resolution::new(16, 8),
                frame_rate: fps,
                ..Default::default()
            },
            output_path: std::env::temp_dir()
                .join(format!("snapcut-pipeline-{}", std::process::id()))
                .join(format!("{name}.mp4")),
        }
    }

    fn run(
        backend: Arc<MemoryBackend>,
        request: &ExportRequest,
        audio: bool,
    ) -> (ExportOutcome, Vec<ExportProgress>) {
        let events = Mutex::new(Vec::new());
        let mut pipeline = ExportPipeline::new(backend, EngineConfig::default());
        let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
        let source = audio.then(|| Box::new(SilenceSource::new(48_000, 2)) as Box<dyn AudioSource>);
        let cancel = AtomicBool::new(false);
        let outcome = pipeline.run(request, &mut renderer, source, &cancel, &|p| {
            events.lock().unwrap().push(p)
        });
        (outcome, events.into_inner().unwrap())
    }

    #[test]
    fn test_encoding_percent_stays_below_hundred() {
        let backend = Arc::new(MemoryBackend::default());
        let (outcome, events) = run(backend, &request("cap", 1000, 10), false);
        assert!(matches!(outcome, ExportOutcome::Completed(_)));
        let last_encoding = events
            .iter()
            .filter(|e| e.status == ExportStatus::Encoding)
            .last()
            .unwrap();
        assert_eq!(last_encoding.current_frame, 10);
        assert_eq!(last_encoding.progress_percent, 99.0);
        assert_eq!(events.last().unwrap().progress_percent, 100.0);
    }

    #[test]
    fn test_audio_covers_project_duration() {
        let backend = Arc::new(MemoryBackend::default());
        let request = request("audio", 500, 10);
        let (outcome, _) = run(Arc::clone(&backend), &request, true);
        let ExportOutcome::Completed(summary) = outcome else {
            panic!("export should complete: {outcome:?}");
        };
        assert!(summary.has_audio);

        let log = &backend.container_logs()[0];
        let audio = log.samples_for(TrackKind::Audio);
        // 24000 sample frames need at least 24 chunks of 1024.
        assert!(audio.len() >= 24);
        assert!(audio
            .windows(2)
            .all(|w| w[0].presentation_time_us < w[1].presentation_time_us));
        assert!(audio.last().unwrap().presentation_time_us < 500_000);
    }

    #[test]
    fn test_mismatched_frame_size_is_fatal() {
        let backend = Arc::new(MemoryBackend::default());
        let request = request("mismatch", 300, 10);
        let mut pipeline = ExportPipeline::new(backend, EngineConfig::default());
        let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 8, 8);
        let cancel = AtomicBool::new(false);
        let events = Mutex::new(Vec::new());
        let outcome = pipeline.run(&request, &mut renderer, None, &cancel, &|p| {
            events.lock().unwrap().push(p)
        });
        assert!(matches!(outcome, ExportOutcome::Failed { .. }));
        let events = events.into_inner().unwrap();
        assert_eq!(events.last().unwrap().status, ExportStatus::Error);
        assert!(!request.output_path.exists());
    }

    #[test]
    fn test_pools_are_reused_across_frames() {
        let backend = Arc::new(MemoryBackend::default());
        let request = request("pools", 1000, 10);
        let mut pipeline = ExportPipeline::new(backend, EngineConfig::default());
        let mut renderer = TestPatternRenderer::new(TestPattern::Solid([9, 9, 9, 255]), 16, 8);
        let cancel = AtomicBool::new(false);
        pipeline.run(&request, &mut renderer, None, &cancel, &|_| {});

        let frames = pipeline.frame_pool().stats();
        assert_eq!(frames.misses, 1);
        assert_eq!(frames.hits, 9);
        assert_eq!(pipeline.bitmap_pool().stats().misses, 1);
    }

    #[test]
    fn test_pooled_buffers_dropped_after_every_outcome() {
        let backend = Arc::new(MemoryBackend::default());
        let mut pipeline = ExportPipeline::new(backend, EngineConfig::default());
        let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);

        let cancel = AtomicBool::new(false);
        let outcome = pipeline.run(&request("kept", 500, 10), &mut renderer, None, &cancel, &|_| {});
        assert!(matches!(outcome, ExportOutcome::Completed(_)));
        assert_eq!(pipeline.frame_pool().stats().retained, 0);
        assert_eq!(pipeline.frame_pool().stats().retained_bytes, 0);
        assert_eq!(pipeline.bitmap_pool().stats().retained, 0);
        assert_eq!(pipeline.bitmap_pool().stats().retained_bytes, 0);

        let mut small = TestPatternRenderer::new(TestPattern::Bars, 8, 8);
        let outcome = pipeline.run(&request("failed", 500, 10), &mut small, None, &cancel, &|_| {});
        assert!(matches!(outcome, ExportOutcome::Failed { .. }));
        assert_eq!(pipeline.bitmap_pool().stats().retained, 0);

        // A later export starts from empty pools.
        let misses = pipeline.frame_pool().stats().misses;
        pipeline.run(&request("again", 200, 10), &mut renderer, None, &cancel, &|_| {});
        assert_eq!(pipeline.frame_pool().stats().misses, misses + 1);
    }

    #[test]
    fn test_hardware_encoder_preferred_when_present() {
        let backend = Arc::new(MemoryBackend::new(MemoryBackendOptions {
            hardware_available: true,
            ..Default::default()
        }));
        let (outcome, _) = run(Arc::clone(&backend), &request("hw", 200, 10), false);
        assert!(matches!(outcome, ExportOutcome::Completed(_)));
        assert!(backend.codec_logs()[0].hardware);
    }
}
