//! Media codec and container abstractions.
//!
//! [`Codec`] models an asynchronous buffer-queue encoder: the caller borrows
//! an input buffer by index, fills it, and queues it back; encoded output is
//! polled by index and must be handed back with
//! [`Codec::release_output_buffer`] once its bytes have been consumed.
//! [`ContainerWriter`] is the muxer side, and [`MediaBackend`] creates both.

use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::time::Duration;

use snapcut_common::error::SnapcutResult;
use snapcut_export_model::ContainerFormat;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Stream parameters that depend on the track kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatParams {
    Video {
        width: u32,
        height: u32,
        frame_rate: u32,
    },
    Audio {
        sample_rate_hz: u32,
        channels: u16,
    },
}

/// Description of an encoder input or output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime: String,
    pub params: FormatParams,
    pub bitrate_bps: u32,
    /// Codec-specific setup data (SPS/PPS, AudioSpecificConfig, ...).
    pub codec_config: Option<Vec<u8>>,
}

impl MediaFormat {
    pub fn video(
        mime: impl Into<String>,
        width: u32,
        height: u32,
        frame_rate: u32,
        bitrate_bps: u32,
    ) -> Self {
        Self {
            mime: mime.into(),
            params: FormatParams::Video {
                width,
                height,
                frame_rate,
            },
            bitrate_bps,
            codec_config: None,
        }
    }

    pub fn audio(
        mime: impl Into<String>,
        sample_rate_hz: u32,
        channels: u16,
        bitrate_bps: u32,
    ) -> Self {
        Self {
            mime: mime.into(),
            params: FormatParams::Audio {
                sample_rate_hz,
                channels,
            },
            bitrate_bps,
            codec_config: None,
        }
    }

    pub fn with_codec_config(mut self, config: Vec<u8>) -> Self {
        self.codec_config = Some(config);
        self
    }

    pub fn kind(&self) -> TrackKind {
        match self.params {
            FormatParams::Video { .. } => TrackKind::Video,
            FormatParams::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// Per-buffer flag set.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    pub const KEY_FRAME: Self = Self(1);
    /// Buffer holds codec setup data, not media.
    pub const CODEC_CONFIG: Self = Self(1 << 1);
    pub const END_OF_STREAM: Self = Self(1 << 2);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_key_frame(&self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_config(&self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.is_key_frame() {
            names.push("KEY_FRAME");
        }
        if self.is_config() {
            names.push("CODEC_CONFIG");
        }
        if self.is_end_of_stream() {
            names.push("END_OF_STREAM");
        }
        write!(f, "BufferFlags({})", names.join(" | "))
    }
}

/// Metadata attached to an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Start of valid data inside the buffer.
    pub offset: usize,
    /// Length of valid data.
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// Result of polling an encoder's output queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPoll {
    /// Nothing ready within the timeout.
    TryAgainLater,
    /// The output format is known; see [`Codec::output_format`].
    FormatChanged,
    /// Output buffer `index` holds data described by `info`.
    Buffer { index: usize, info: BufferInfo },
}

/// One encoded chunk, borrowed from an encoder output buffer.
///
/// The payload is only valid until the buffer is released back to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedAccessUnit<'a> {
    pub track: TrackKind,
    pub payload: &'a [u8],
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl EncodedAccessUnit<'_> {
    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            offset: 0,
            size: self.payload.len(),
            presentation_time_us: self.presentation_time_us,
            flags: self.flags,
        }
    }
}

/// An encoder speaking the buffer-queue protocol.
pub trait Codec: Send {
    /// Codec instance name, for logs.
    fn name(&self) -> &str;

    /// Whether this instance runs on dedicated hardware.
    fn is_hardware(&self) -> bool;

    fn configure(&mut self, format: &MediaFormat) -> SnapcutResult<()>;

    fn start(&mut self) -> SnapcutResult<()>;

    /// Borrow a free input buffer, waiting at most `timeout`.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> SnapcutResult<Option<usize>>;

    /// Writable storage of input buffer `index`.
    fn input_buffer(&mut self, index: usize) -> SnapcutResult<&mut [u8]>;

    /// Hand input buffer `index` back holding `size` bytes.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> SnapcutResult<()>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> SnapcutResult<OutputPoll>;

    /// Output format; valid after [`OutputPoll::FormatChanged`].
    fn output_format(&self) -> SnapcutResult<MediaFormat>;

    /// Contents of output buffer `index`.
    fn output_buffer(&self, index: usize) -> SnapcutResult<&[u8]>;

    fn release_output_buffer(&mut self, index: usize) -> SnapcutResult<()>;

    fn stop(&mut self) -> SnapcutResult<()>;

    /// Free all resources. Must be safe to call more than once.
    fn release(&mut self);
}

/// A container file writer.
pub trait ContainerWriter: Send {
    /// Register a track; only valid before [`ContainerWriter::start`].
    fn add_track(&mut self, format: &MediaFormat) -> SnapcutResult<usize>;

    fn start(&mut self) -> SnapcutResult<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> SnapcutResult<()>;

    fn stop(&mut self) -> SnapcutResult<()>;

    /// Free all resources. Must be safe to call more than once.
    fn release(&mut self);
}

/// Factory for codecs and containers on one media stack.
pub trait MediaBackend: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// Check if this backend is usable on the system.
    fn is_available(&self) -> bool;

    fn create_hardware_encoder(&self, mime: &str) -> SnapcutResult<Box<dyn Codec>>;

    fn create_software_encoder(&self, mime: &str) -> SnapcutResult<Box<dyn Codec>>;

    fn create_container(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> SnapcutResult<Box<dyn ContainerWriter>>;
}
