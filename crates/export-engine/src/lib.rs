//! Snapcut Export Engine
//!
//! Turns a project timeline into an encoded video file. Frames are rendered
//! as RGBA, converted to YUV 4:2:0, pushed through buffer-queue encoders,
//! and written into a container that starts once every track has reported
//! its output format.
//!
//! # Pipeline Architecture
//!
//! ```text
//! FrameRenderer ── RGBA ──► PixelConverter ── NV12 ──► EncoderSession (video) ──┐
//!                                                                               ├──► MuxerSession ──► output.mp4
//! AudioSource ──── PCM ───────────────────────────────► EncoderSession (audio) ──┘
//!
//! ExportPipeline::run ──► Preparing ─► Encoding … ─► Finalizing ─► Completed
//!                                                   └──────────► Error | Cancelled
//! ```
//!
//! [`memory::MemoryBackend`] is always available and backs the tests. The
//! `gst` feature adds [`gst::GstBackend`], which drives real encoders and
//! muxers through GStreamer.

pub mod codec;
pub mod encoder;
#[cfg(feature = "gst")]
pub mod gst;
pub mod memory;
pub mod muxer;
pub mod pipeline;
pub mod pixel;
pub mod pool;
pub mod render;
pub mod service;

pub use codec::{
    BufferFlags, BufferInfo, Codec, ContainerWriter, EncodedAccessUnit, FormatParams,
    MediaBackend, MediaFormat, OutputPoll, TrackKind,
};
pub use encoder::{DrainEvent, DrainSummary, EncoderSession, EncoderState};
pub use memory::{MemoryBackend, MemoryBackendOptions};
pub use muxer::MuxerSession;
pub use pipeline::{ExportOutcome, ExportPipeline, ExportRequest, ExportSummary};
pub use pixel::{PixelConverter, PixelFormat};
pub use pool::{BitmapPool, FrameKey, FramePool, PoolStats};
pub use render::{
    AudioSource, FrameRenderer, RendererProvider, RgbaFrame, SilenceSource, TestPattern,
    TestPatternProvider, TestPatternRenderer,
};
pub use service::{ExportService, ProgressStream};
