//! Muxer session: container writer with deferred start.
//!
//! Tracks are registered as each encoder reports its output format. The
//! container only starts once every expected track is known, whichever
//! encoder gets there last. Access units that arrive earlier are held back
//! and written in presentation order right after the start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use snapcut_common::error::{SnapcutError, SnapcutResult};

use crate::codec::{BufferInfo, ContainerWriter, EncodedAccessUnit, MediaFormat, TrackKind};

/// Access unit copied out of an encoder while the container is not started yet.
#[derive(Debug)]
struct PendingSample {
    track: TrackKind,
    data: Vec<u8>,
    info: BufferInfo,
}

/// Owns one container writer and its registration state.
pub struct MuxerSession {
    writer: Box<dyn ContainerWriter>,
    path: PathBuf,
    expect_audio: bool,
    tracks: HashMap<TrackKind, usize>,
    started: bool,
    stopped: bool,
    released: bool,
    pending: Vec<PendingSample>,
    samples_written: u64,
}

impl MuxerSession {
    /// `expect_audio` is true if and only if an audio encoder exists.
    pub fn new(writer: Box<dyn ContainerWriter>, path: impl Into<PathBuf>, expect_audio: bool) -> Self {
        Self {
            writer,
            path: path.into(),
            expect_audio,
            tracks: HashMap::new(),
            started: false,
            stopped: false,
            released: false,
            pending: Vec::new(),
            samples_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Access units waiting for the container to start.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn track_index(&self, kind: TrackKind) -> Option<usize> {
        self.tracks.get(&kind).copied()
    }

    /// Whether every expected track has been registered.
    pub fn is_ready(&self) -> bool {
        self.tracks.contains_key(&TrackKind::Video)
            && (!self.expect_audio || self.tracks.contains_key(&TrackKind::Audio))
    }

    /// Register one track. Only valid before [`start`](Self::start).
    pub fn add_track(&mut self, format: &MediaFormat) -> SnapcutResult<usize> {
        let kind = format.kind();
        if self.started {
            return Err(SnapcutError::muxer(format!(
                "cannot add {kind} track after the container started"
            )));
        }
        if kind == TrackKind::Audio && !self.expect_audio {
            return Err(SnapcutError::muxer("audio track offered to a video-only export"));
        }
        if self.tracks.contains_key(&kind) {
            return Err(SnapcutError::muxer(format!("{kind} track registered twice")));
        }
        let index = self.writer.add_track(format)?;
        self.tracks.insert(kind, index);
        tracing::debug!(track = %kind, index, mime = %format.mime, "Track registered");
        Ok(index)
    }

    /// Start the container. Must be called exactly once, after all tracks are registered.
    pub fn start(&mut self) -> SnapcutResult<()> {
        if self.started {
            return Err(SnapcutError::invalid_state("muxer already started"));
        }
        if !self.is_ready() {
            return Err(SnapcutError::invalid_state(format!(
                "muxer start with tracks {:?} registered, audio expected: {}",
                self.tracks.keys().collect::<Vec<_>>(),
                self.expect_audio
            )));
        }
        self.writer.start()?;
        self.started = true;
        tracing::info!(
            path = %self.path.display(),
            tracks = self.tracks.len(),
            "Container started"
        );

        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|s| s.info.presentation_time_us);
        for sample in pending {
            let index = self.require_track(sample.track)?;
            self.write_raw(index, &sample.data, &sample.info)?;
        }
        Ok(())
    }

    /// Write one access unit to `track`.
    ///
    /// Rejected before [`start`](Self::start) and for codec-config units;
    /// nothing reaches the container in either case.
    pub fn write_sample(&mut self, track: usize, unit: &EncodedAccessUnit<'_>) -> SnapcutResult<()> {
        if !self.started {
            return Err(SnapcutError::invalid_state(
                "write_sample before the muxer started",
            ));
        }
        if unit.flags.is_config() {
            return Err(SnapcutError::muxer("codec config data is not a sample"));
        }
        if !self.tracks.values().any(|&i| i == track) {
            return Err(SnapcutError::muxer(format!("unknown track index {track}")));
        }
        self.write_raw(track, unit.payload, &unit.info())
    }

    /// Write `unit` now if the container runs, otherwise hold a copy until it starts.
    pub fn push(&mut self, unit: &EncodedAccessUnit<'_>) -> SnapcutResult<()> {
        if unit.flags.is_config() {
            return Ok(());
        }
        if self.started {
            let index = self.require_track(unit.track)?;
            return self.write_sample(index, unit);
        }
        self.pending.push(PendingSample {
            track: unit.track,
            data: unit.payload.to_vec(),
            info: unit.info(),
        });
        Ok(())
    }

    fn require_track(&self, kind: TrackKind) -> SnapcutResult<usize> {
        self.track_index(kind)
            .ok_or_else(|| SnapcutError::muxer(format!("no {kind} track registered")))
    }

    fn write_raw(&mut self, index: usize, data: &[u8], info: &BufferInfo) -> SnapcutResult<()> {
        self.writer.write_sample(index, data, info)?;
        self.samples_written += 1;
        Ok(())
    }

    /// Finish the container. A no-op when it never started.
    pub fn stop(&mut self) -> SnapcutResult<()> {
        if !self.started {
            tracing::debug!("Muxer never started, skipping stop");
            return Ok(());
        }
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if !self.pending.is_empty() {
            tracing::warn!(dropped = self.pending.len(), "Discarding unwritten samples");
            self.pending.clear();
        }
        self.writer.stop()?;
        tracing::info!(
            path = %self.path.display(),
            samples = self.samples_written,
            "Container finalized"
        );
        Ok(())
    }

    /// Release the writer. Safe on repeat calls.
    ///
    /// A container that never started holds no media, so its file is removed.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pending.clear();
        self.writer.release();
        if !self.started && self.path.exists() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!(path = %self.path.display(), "Removed unstarted output"),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove unstarted output"
                ),
            }
        }
    }
}

impl Drop for MuxerSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for MuxerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxerSession")
            .field("path", &self.path)
            .field("tracks", &self.tracks)
            .field("started", &self.started)
            .field("pending", &self.pending.len())
            .finish()
    }
}
