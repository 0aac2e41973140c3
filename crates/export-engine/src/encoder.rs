//! Encoder session: one codec instance and its buffer-queue state machine.
//!
//! ```text
//! Created ──configure──▶ Configured ──start──▶ Started ──EOS──▶ Draining
//!                                                 │                │
//!                                                 └──────stop──────┴──▶ Stopped ──▶ Released
//! ```
//!
//! Every output buffer taken from the codec is released back to it before
//! [`EncoderSession::drain`] returns, whether the sink accepted the data or
//! failed.

use std::time::Duration;

use snapcut_common::error::{SnapcutError, SnapcutResult};

use crate::codec::{
    BufferFlags, BufferInfo, Codec, EncodedAccessUnit, MediaBackend, MediaFormat, OutputPoll,
    TrackKind,
};

/// Idle polls tolerated while waiting for the end-of-stream buffer.
const MAX_IDLE_EOS_POLLS: u32 = 3_000;

/// Lifecycle of an [`EncoderSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Created,
    Configured,
    Started,
    Draining,
    Stopped,
    Released,
}

/// What a drain pass hands to its sink.
///
/// The sink answers `FormatAvailable` with the muxer track the format was
/// registered under, which the session records before draining further.
/// Units are answered with `None`.
#[derive(Debug)]
pub enum DrainEvent<'a> {
    /// The output format is known. Fires at most once per session.
    FormatAvailable(&'a MediaFormat),
    /// An encoded access unit. Codec-config buffers are never forwarded.
    Unit(EncodedAccessUnit<'a>),
}

/// Outcome of one [`EncoderSession::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Access units forwarded to the sink.
    pub units: usize,
    /// Codec-config buffers swallowed.
    pub config_buffers: usize,
    /// The end-of-stream buffer was seen.
    pub end_of_stream: bool,
}

/// Owns one encoder and drives its input/output buffer protocol.
pub struct EncoderSession {
    codec: Box<dyn Codec>,
    kind: TrackKind,
    state: EncoderState,
    timeout: Duration,
    output_format: Option<MediaFormat>,
    track_index: Option<usize>,
    end_of_stream_queued: bool,
    end_of_stream_seen: bool,
    submitted: u64,
}

impl EncoderSession {
    /// Wrap an already created codec.
    pub fn new(codec: Box<dyn Codec>, kind: TrackKind, timeout: Duration) -> Self {
        Self {
            codec,
            kind,
            state: EncoderState::Created,
            timeout,
            output_format: None,
            track_index: None,
            end_of_stream_queued: false,
            end_of_stream_seen: false,
            submitted: 0,
        }
    }

    /// Create an encoder for `format.mime`, trying hardware first when asked to.
    ///
    /// A hardware creation failure falls back to the software encoder of the
    /// same MIME type; a software failure is a setup error.
    pub fn create(
        backend: &dyn MediaBackend,
        format: &MediaFormat,
        prefer_hardware: bool,
        timeout: Duration,
    ) -> SnapcutResult<Self> {
        let kind = format.kind();
        if prefer_hardware {
            match backend.create_hardware_encoder(&format.mime) {
                Ok(codec) => {
                    tracing::info!(codec = codec.name(), track = %kind, "Using hardware encoder");
                    return Ok(Self::new(codec, kind, timeout));
                }
                Err(e) => {
                    tracing::warn!(
                        mime = %format.mime,
                        error = %e,
                        "Hardware encoder unavailable, falling back to software"
                    );
                }
            }
        }

        let codec = backend.create_software_encoder(&format.mime).map_err(|e| {
            SnapcutError::setup(format!("No encoder for {}: {e}", format.mime))
        })?;
        tracing::info!(codec = codec.name(), track = %kind, "Using software encoder");
        Ok(Self::new(codec, kind, timeout))
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn codec_name(&self) -> &str {
        self.codec.name()
    }

    pub fn is_hardware(&self) -> bool {
        self.codec.is_hardware()
    }

    /// Track index assigned by the muxer, if any.
    pub fn track_index(&self) -> Option<usize> {
        self.track_index
    }

    /// Record the muxer track for this encoder. Only allowed once.
    pub fn assign_track(&mut self, index: usize) -> SnapcutResult<()> {
        if let Some(existing) = self.track_index {
            return Err(SnapcutError::invalid_state(format!(
                "{} encoder already owns track {existing}",
                self.kind
            )));
        }
        self.track_index = Some(index);
        Ok(())
    }

    pub fn output_format(&self) -> Option<&MediaFormat> {
        self.output_format.as_ref()
    }

    /// Inputs accepted so far, end-of-stream excluded.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn end_of_stream_seen(&self) -> bool {
        self.end_of_stream_seen
    }

    fn expect_state(&self, allowed: &[EncoderState], op: &str) -> SnapcutResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SnapcutError::invalid_state(format!(
                "cannot {op} {} encoder in state {:?}",
                self.kind, self.state
            )))
        }
    }

    pub fn configure(&mut self, format: &MediaFormat) -> SnapcutResult<()> {
        self.expect_state(&[EncoderState::Created], "configure")?;
        if format.kind() != self.kind {
            return Err(SnapcutError::setup(format!(
                "{} format given to {} encoder",
                format.kind(),
                self.kind
            )));
        }
        self.codec.configure(format).map_err(|e| {
            SnapcutError::setup(format!("{} rejected {}: {e}", self.codec.name(), format.mime))
        })?;
        self.state = EncoderState::Configured;
        Ok(())
    }

    pub fn start(&mut self) -> SnapcutResult<()> {
        self.expect_state(&[EncoderState::Configured], "start")?;
        self.codec
            .start()
            .map_err(|e| SnapcutError::setup(format!("{} failed to start: {e}", self.codec.name())))?;
        self.state = EncoderState::Started;
        tracing::debug!(codec = self.codec.name(), track = %self.kind, "Encoder started");
        Ok(())
    }

    /// Queue one input. Returns `false` when no input buffer freed up within
    /// the timeout; nothing was consumed and the caller may retry.
    pub fn submit_frame(&mut self, bytes: &[u8], presentation_time_us: i64) -> SnapcutResult<bool> {
        self.expect_state(&[EncoderState::Started], "submit to")?;
        self.queue_input(bytes, presentation_time_us, BufferFlags::NONE)
    }

    /// Queue the empty end-of-stream input. Returns `false` when no input
    /// buffer was free; follow a `true` with `drain(true, ..)`.
    pub fn signal_end_of_stream(&mut self) -> SnapcutResult<bool> {
        if self.end_of_stream_queued {
            return Ok(true);
        }
        self.expect_state(&[EncoderState::Started], "signal end of stream on")?;
        let presentation_time_us = 0;
        if !self.queue_input(&[], presentation_time_us, BufferFlags::END_OF_STREAM)? {
            return Ok(false);
        }
        self.end_of_stream_queued = true;
        self.state = EncoderState::Draining;
        tracing::debug!(track = %self.kind, submitted = self.submitted, "End of stream queued");
        Ok(true)
    }

    fn queue_input(
        &mut self,
        bytes: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> SnapcutResult<bool> {
        let Some(index) = self.codec.dequeue_input_buffer(self.timeout)? else {
            return Ok(false);
        };
        let buffer = self.codec.input_buffer(index)?;
        if bytes.len() > buffer.len() {
            return Err(SnapcutError::encoder(format!(
                "{} input of {} bytes exceeds buffer capacity {}",
                self.kind,
                bytes.len(),
                buffer.len()
            )));
        }
        buffer[..bytes.len()].copy_from_slice(bytes);
        self.codec
            .queue_input_buffer(index, bytes.len(), presentation_time_us, flags)?;
        if !flags.is_end_of_stream() {
            self.submitted += 1;
        }
        Ok(true)
    }

    /// Pull finished output and hand it to `sink`.
    ///
    /// Non-blocking drains stop at the first empty poll. A blocking drain is
    /// only valid after [`signal_end_of_stream`](Self::signal_end_of_stream)
    /// and keeps polling until the end-of-stream buffer arrives.
    pub fn drain(
        &mut self,
        blocking: bool,
        sink: &mut dyn FnMut(DrainEvent<'_>) -> SnapcutResult<Option<usize>>,
    ) -> SnapcutResult<DrainSummary> {
        self.expect_state(&[EncoderState::Started, EncoderState::Draining], "drain")?;
        if blocking && !self.end_of_stream_queued {
            return Err(SnapcutError::invalid_state(format!(
                "blocking drain of {} encoder before end of stream",
                self.kind
            )));
        }

        let mut summary = DrainSummary::default();
        if self.end_of_stream_seen {
            summary.end_of_stream = true;
            return Ok(summary);
        }

        let mut idle_polls = 0u32;
        loop {
            match self.codec.dequeue_output_buffer(self.timeout)? {
                OutputPoll::TryAgainLater => {
                    if !blocking {
                        break;
                    }
                    idle_polls += 1;
                    if idle_polls >= MAX_IDLE_EOS_POLLS {
                        return Err(SnapcutError::encoder(format!(
                            "{} never produced end of stream",
                            self.codec.name()
                        )));
                    }
                }
                OutputPoll::FormatChanged => {
                    if self.output_format.is_some() {
                        tracing::warn!(track = %self.kind, "Ignoring repeated output format change");
                        continue;
                    }
                    let format = self.codec.output_format()?;
                    tracing::debug!(track = %self.kind, mime = %format.mime, "Output format available");
                    let format = self.output_format.insert(format);
                    if let Some(index) = sink(DrainEvent::FormatAvailable(format))? {
                        self.assign_track(index)?;
                    }
                }
                OutputPoll::Buffer { index, info } => {
                    let forwarded = self.forward_output(index, &info, sink);
                    let released = self.codec.release_output_buffer(index);
                    let forwarded = forwarded?;
                    released?;

                    if info.flags.is_config() {
                        summary.config_buffers += 1;
                    } else if forwarded {
                        summary.units += 1;
                    }
                    if info.flags.is_end_of_stream() {
                        self.end_of_stream_seen = true;
                        summary.end_of_stream = true;
                        break;
                    }
                    idle_polls = 0;
                }
            }
        }
        Ok(summary)
    }

    /// Hand one output buffer to the sink. Returns whether anything was forwarded.
    fn forward_output(
        &self,
        index: usize,
        info: &BufferInfo,
        sink: &mut dyn FnMut(DrainEvent<'_>) -> SnapcutResult<Option<usize>>,
    ) -> SnapcutResult<bool> {
        if info.flags.is_config() {
            tracing::debug!(track = %self.kind, size = info.size, "Skipping codec config buffer");
            return Ok(false);
        }
        if info.size == 0 {
            return Ok(false);
        }
        let data = self.codec.output_buffer(index)?;
        let payload = info
            .offset
            .checked_add(info.size)
            .and_then(|end| data.get(info.offset..end))
            .ok_or_else(|| {
                SnapcutError::encoder(format!(
                    "output buffer {index} is {} bytes, info claims {}+{}",
                    data.len(),
                    info.offset,
                    info.size
                ))
            })?;
        sink(DrainEvent::Unit(EncodedAccessUnit {
            track: self.kind,
            payload,
            presentation_time_us: info.presentation_time_us,
            flags: info.flags,
        }))?;
        Ok(true)
    }

    /// Stop the codec. Only meaningful while started or draining.
    pub fn stop(&mut self) -> SnapcutResult<()> {
        match self.state {
            EncoderState::Started | EncoderState::Draining => {
                self.state = EncoderState::Stopped;
                self.codec.stop()
            }
            _ => Ok(()),
        }
    }

    /// Stop and release the codec. Safe in any state and on repeat calls.
    pub fn release(&mut self) {
        if self.state == EncoderState::Released {
            return;
        }
        if let Err(e) = self.stop() {
            tracing::warn!(track = %self.kind, error = %e, "Encoder stop failed during release");
        }
        self.codec.release();
        self.state = EncoderState::Released;
        tracing::debug!(track = %self.kind, "Encoder released");
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for EncoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("codec", &self.codec.name())
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("track_index", &self.track_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LoopbackCodec, MemoryBackend, MemoryBackendOptions};

    const TIMEOUT: Duration = Duration::from_millis(1);

    fn video_format() -> MediaFormat {
        MediaFormat::video("video/avc", 4, 2, 10, 1_000_000)
    }

    fn started_session(options: MemoryBackendOptions) -> (EncoderSession, std::sync::Arc<std::sync::Mutex<crate::memory::CodecLog>>) {
        let codec = LoopbackCodec::new("test", "video/avc", false, options);
        let log = codec.log();
        let mut session = EncoderSession::new(Box::new(codec), TrackKind::Video, TIMEOUT);
        session.configure(&video_format()).unwrap();
        session.start().unwrap();
        (session, log)
    }

    #[test]
    fn test_hardware_failure_falls_back_to_software() {
        let backend = MemoryBackend::default();
        let session = EncoderSession::create(&backend, &video_format(), true, TIMEOUT).unwrap();
        assert!(!session.is_hardware());
        assert_eq!(backend.codec_logs().len(), 1);
    }

    #[test]
    fn test_missing_software_encoder_is_setup_error() {
        let backend = MemoryBackend::new(MemoryBackendOptions {
            video_available: false,
            ..Default::default()
        });
        let err = EncoderSession::create(&backend, &video_format(), true, TIMEOUT).unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn test_state_machine_rejects_out_of_order_calls() {
        let codec = LoopbackCodec::new("test", "video/avc", false, MemoryBackendOptions::default());
        let mut session = EncoderSession::new(Box::new(codec), TrackKind::Video, TIMEOUT);
        assert!(session.start().is_err());
        assert!(session.submit_frame(&[0; 12], 0).is_err());
        session.configure(&video_format()).unwrap();
        assert!(session.configure(&video_format()).is_err());
        session.start().unwrap();
        assert_eq!(session.state(), EncoderState::Started);
        assert!(session
            .drain(true, &mut |_event: DrainEvent<'_>| -> SnapcutResult<Option<usize>> {
                Ok(None)
            })
            .is_err());
    }

    #[test]
    fn test_config_buffers_never_reach_the_sink() {
        let (mut session, log) = started_session(MemoryBackendOptions {
            latency_frames: 0,
            ..Default::default()
        });
        for frame in 0..3 {
            assert!(session.submit_frame(&[frame as u8; 12], frame * 100_000).unwrap());
        }
        assert!(session.signal_end_of_stream().unwrap());
        assert_eq!(session.state(), EncoderState::Draining);

        let mut formats = 0;
        let mut units = Vec::new();
        let summary = session
            .drain(true, &mut |event: DrainEvent<'_>| -> SnapcutResult<Option<usize>> {
                match event {
                    DrainEvent::FormatAvailable(_) => formats += 1,
                    DrainEvent::Unit(unit) => {
                        assert!(!unit.flags.is_config());
                        units.push(unit.presentation_time_us);
                    }
                }
                Ok(None)
            })
            .unwrap();

        assert_eq!(formats, 1);
        assert_eq!(units, [0, 100_000, 200_000]);
        assert_eq!(summary.config_buffers, 1);
        assert_eq!(summary.units, 3);
        assert!(summary.end_of_stream);
        assert!(session.end_of_stream_seen());
        assert_eq!(log.lock().unwrap().outstanding_outputs(), 0);
    }

    #[test]
    fn test_sink_error_still_releases_buffer() {
        let (mut session, log) = started_session(MemoryBackendOptions {
            latency_frames: 0,
            ..Default::default()
        });
        session.submit_frame(&[1; 12], 0).unwrap();
        let result = session.drain(
            false,
            &mut |event: DrainEvent<'_>| -> SnapcutResult<Option<usize>> {
                match event {
                    DrainEvent::Unit(_) => Err(SnapcutError::muxer("disk full")),
                    DrainEvent::FormatAvailable(_) => Ok(None),
                }
            },
        );
        assert!(result.is_err());
        assert_eq!(log.lock().unwrap().outstanding_outputs(), 0);
    }

    #[test]
    fn test_full_input_queue_reports_false() {
        let (mut session, _log) = started_session(MemoryBackendOptions {
            input_slots: 1,
            latency_frames: 1,
            ..Default::default()
        });
        assert!(session.submit_frame(&[0; 12], 0).unwrap());
        assert!(session.submit_frame(&[0; 12], 1).unwrap());
        assert!(!session.submit_frame(&[0; 12], 2).unwrap());
        assert_eq!(session.submitted(), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut session, log) = started_session(MemoryBackendOptions::default());
        session.release();
        session.release();
        assert_eq!(session.state(), EncoderState::Released);
        drop(session);
        let log = log.lock().unwrap();
        assert_eq!(log.releases, 1);
        assert!(log.stopped);
    }

    #[test]
    fn test_track_assigned_once() {
        let (mut session, _log) = started_session(MemoryBackendOptions::default());
        session.assign_track(0).unwrap();
        assert!(session.assign_track(1).is_err());
        assert_eq!(session.track_index(), Some(0));
    }

    #[test]
    fn test_track_recorded_when_format_arrives() {
        let (mut session, _log) = started_session(MemoryBackendOptions {
            latency_frames: 0,
            ..Default::default()
        });
        session.submit_frame(&[1; 12], 0).unwrap();

        // A sink failure on the first unit must not lose the track recorded
        // for the format that preceded it.
        let mut units = 0;
        let result = session.drain(
            false,
            &mut |event: DrainEvent<'_>| -> SnapcutResult<Option<usize>> {
                match event {
                    DrainEvent::FormatAvailable(_) => Ok(Some(3)),
                    DrainEvent::Unit(_) => {
                        units += 1;
                        Err(SnapcutError::muxer("disk full"))
                    }
                }
            },
        );
        assert!(result.is_err());
        assert_eq!(units, 1);
        assert_eq!(session.track_index(), Some(3));
        assert!(session.output_format().is_some());
    }
}
