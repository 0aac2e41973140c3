//! In-process media backend.
//!
//! [`LoopbackCodec`] follows the buffer-queue protocol of a real encoder
//! (format change first, a codec-config buffer, then one access unit per
//! input after a configurable lookahead, and an end-of-stream buffer) but
//! "encodes" each input into a short fingerprint. [`MemoryContainer`] writes
//! those samples to a simple length-prefixed file. Every call is recorded so
//! callers can inspect what happened after an export.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use snapcut_common::error::{SnapcutError, SnapcutResult};
use snapcut_export_model::ContainerFormat;

use crate::codec::{
    BufferFlags, BufferInfo, Codec, ContainerWriter, FormatParams, MediaBackend, MediaFormat,
    OutputPoll, TrackKind,
};

/// Output buffers a codec lends out before it refuses to produce more.
const MAX_OUTPUT_SLOTS: usize = 8;

/// File magic written by [`MemoryContainer`].
pub const MEMORY_CONTAINER_MAGIC: &[u8; 8] = b"SNAPCUT1";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fnv1a_64(input: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Knobs for [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryBackendOptions {
    /// Whether hardware encoder creation succeeds.
    pub hardware_available: bool,
    /// Whether a software audio encoder exists.
    pub audio_available: bool,
    /// Whether a software video encoder exists.
    pub video_available: bool,
    /// Inputs held inside the codec before output appears.
    pub latency_frames: usize,
    /// Inputs that may be in flight before `dequeue_input_buffer` times out.
    pub input_slots: usize,
    /// Video encoder fails on the input after this many.
    pub fail_video_after: Option<u64>,
    /// Container fails on the sample after this many.
    pub fail_write_after: Option<u64>,
    /// Simulated encode time per video input.
    pub encode_delay: Duration,
}

impl Default for MemoryBackendOptions {
    fn default() -> Self {
        Self {
            hardware_available: false,
            audio_available: true,
            video_available: true,
            latency_frames: 2,
            input_slots: 4,
            fail_video_after: None,
            fail_write_after: None,
            encode_delay: Duration::ZERO,
        }
    }
}

/// What happened to one codec instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecLog {
    pub name: String,
    pub mime: String,
    pub hardware: bool,
    pub inputs_queued: u64,
    pub outputs_dequeued: u64,
    pub outputs_released: u64,
    pub end_of_stream_emitted: bool,
    pub stopped: bool,
    pub releases: u32,
}

impl CodecLog {
    /// Output buffers dequeued but never given back.
    pub fn outstanding_outputs(&self) -> u64 {
        self.outputs_dequeued - self.outputs_released
    }
}

/// One sample as seen by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRecord {
    pub track: usize,
    pub presentation_time_us: i64,
    pub size: usize,
    pub flags: BufferFlags,
}

/// What happened to one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLog {
    pub path: PathBuf,
    pub tracks: Vec<TrackKind>,
    pub starts: u32,
    pub samples: Vec<SampleRecord>,
    pub rejected_writes: u32,
    pub stops: u32,
    pub releases: u32,
}

impl ContainerLog {
    pub fn samples_for(&self, kind: TrackKind) -> Vec<SampleRecord> {
        let Some(index) = self.tracks.iter().position(|&k| k == kind) else {
            return Vec::new();
        };
        self.samples
            .iter()
            .filter(|s| s.track == index)
            .copied()
            .collect()
    }
}

#[derive(Debug)]
struct QueuedInput {
    payload: Vec<u8>,
    presentation_time_us: i64,
    end_of_stream: bool,
}

/// Software codec that fingerprints its input.
#[derive(Debug)]
pub struct LoopbackCodec {
    name: String,
    hardware: bool,
    options: MemoryBackendOptions,
    format: Option<MediaFormat>,
    started: bool,
    released: bool,
    input_buffers: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    lent_inputs: usize,
    queue: VecDeque<QueuedInput>,
    format_announced: bool,
    config_emitted: bool,
    end_of_stream_queued: bool,
    emitted: u64,
    outputs: HashMap<usize, (Vec<u8>, BufferInfo)>,
    next_output: usize,
    log: Arc<Mutex<CodecLog>>,
}

impl LoopbackCodec {
    pub fn new(
        name: impl Into<String>,
        mime: &str,
        hardware: bool,
        options: MemoryBackendOptions,
    ) -> Self {
        let name = name.into();
        let log = CodecLog {
            name: name.clone(),
            mime: mime.to_string(),
            hardware,
            ..Default::default()
        };
        Self {
            name,
            hardware,
            options,
            format: None,
            started: false,
            released: false,
            input_buffers: Vec::new(),
            free_inputs: VecDeque::new(),
            lent_inputs: 0,
            queue: VecDeque::new(),
            format_announced: false,
            config_emitted: false,
            end_of_stream_queued: false,
            emitted: 0,
            outputs: HashMap::new(),
            next_output: 0,
            log: Arc::new(Mutex::new(log)),
        }
    }

    /// Shared record of this codec's activity.
    pub fn log(&self) -> Arc<Mutex<CodecLog>> {
        Arc::clone(&self.log)
    }

    fn input_capacity(format: &MediaFormat) -> usize {
        match format.params {
            FormatParams::Video { width, height, .. } => {
                width as usize * height as usize * 3 / 2
            }
            // 100ms of 16-bit PCM, enough for any chunk the pipeline sends.
            FormatParams::Audio {
                sample_rate_hz,
                channels,
            } => (sample_rate_hz as usize * channels as usize * 2 / 10).max(8192),
        }
    }

    fn kind(&self) -> Option<TrackKind> {
        self.format.as_ref().map(MediaFormat::kind)
    }

    fn require_started(&self) -> SnapcutResult<()> {
        if self.started && !self.released {
            Ok(())
        } else {
            Err(SnapcutError::encoder(format!("{} is not running", self.name)))
        }
    }

    /// Number of queued media inputs whose output may be emitted now.
    fn ready_inputs(&self) -> usize {
        let media = self.queue.iter().filter(|q| !q.end_of_stream).count();
        if self.end_of_stream_queued {
            media
        } else {
            media.saturating_sub(self.options.latency_frames)
        }
    }

    fn lend_output(&mut self, payload: Vec<u8>, info: BufferInfo) -> SnapcutResult<OutputPoll> {
        if self.outputs.len() >= MAX_OUTPUT_SLOTS {
            return Err(SnapcutError::encoder(format!(
                "{} ran out of output buffers ({} never released)",
                self.name,
                self.outputs.len()
            )));
        }
        let index = self.next_output;
        self.next_output += 1;
        self.outputs.insert(index, (payload, info));
        lock(&self.log).outputs_dequeued += 1;
        Ok(OutputPoll::Buffer { index, info })
    }
}

impl Codec for LoopbackCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_hardware(&self) -> bool {
        self.hardware
    }

    fn configure(&mut self, format: &MediaFormat) -> SnapcutResult<()> {
        if self.started {
            return Err(SnapcutError::encoder("configure after start"));
        }
        if format.bitrate_bps == 0 && !matches!(format.params, FormatParams::Audio { .. }) {
            return Err(SnapcutError::encoder("video bitrate must be positive"));
        }
        let capacity = Self::input_capacity(format);
        let slots = self.options.input_slots.max(1);
        self.input_buffers = vec![vec![0u8; capacity]; slots];
        self.free_inputs = (0..slots).collect();
        self.format = Some(format.clone());
        Ok(())
    }

    fn start(&mut self) -> SnapcutResult<()> {
        if self.format.is_none() {
            return Err(SnapcutError::encoder("start before configure"));
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> SnapcutResult<Option<usize>> {
        self.require_started()?;
        if self.end_of_stream_queued {
            return Ok(None);
        }
        // Lookahead plus lent buffers is all the codec holds.
        let in_flight = self.queue.len() + self.lent_inputs;
        if in_flight >= self.options.input_slots.max(1) + self.options.latency_frames {
            return Ok(None);
        }
        let index = self.free_inputs.pop_front();
        if index.is_some() {
            self.lent_inputs += 1;
        }
        Ok(index)
    }

    fn input_buffer(&mut self, index: usize) -> SnapcutResult<&mut [u8]> {
        self.input_buffers
            .get_mut(index)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| SnapcutError::encoder(format!("no input buffer {index}")))
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> SnapcutResult<()> {
        self.require_started()?;
        let buffer = self
            .input_buffers
            .get(index)
            .ok_or_else(|| SnapcutError::encoder(format!("no input buffer {index}")))?;
        let payload = buffer
            .get(..size)
            .ok_or_else(|| SnapcutError::encoder(format!("input size {size} out of range")))?
            .to_vec();
        self.free_inputs.push_back(index);
        self.lent_inputs = self.lent_inputs.saturating_sub(1);

        let end_of_stream = flags.is_end_of_stream();
        if !end_of_stream && self.kind() == Some(TrackKind::Video) {
            let queued = lock(&self.log).inputs_queued;
            if self.options.fail_video_after.is_some_and(|limit| queued >= limit) {
                return Err(SnapcutError::encoder(format!(
                    "{} failed on input {queued}",
                    self.name
                )));
            }
            if !self.options.encode_delay.is_zero() {
                std::thread::sleep(self.options.encode_delay);
            }
        }
        if end_of_stream {
            self.end_of_stream_queued = true;
        } else {
            lock(&self.log).inputs_queued += 1;
        }
        self.queue.push_back(QueuedInput {
            payload,
            presentation_time_us,
            end_of_stream,
        });
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> SnapcutResult<OutputPoll> {
        self.require_started()?;
        let has_output = self.ready_inputs() > 0
            || self.queue.front().is_some_and(|q| q.end_of_stream);
        if !has_output {
            return Ok(OutputPoll::TryAgainLater);
        }
        if !self.format_announced {
            self.format_announced = true;
            return Ok(OutputPoll::FormatChanged);
        }
        if !self.config_emitted {
            self.config_emitted = true;
            let config = format!("{}-config", self.name).into_bytes();
            let info = BufferInfo {
                offset: 0,
                size: config.len(),
                presentation_time_us: 0,
                flags: BufferFlags::CODEC_CONFIG,
            };
            return self.lend_output(config, info);
        }

        let Some(input) = self.queue.pop_front() else {
            return Ok(OutputPoll::TryAgainLater);
        };
        if input.end_of_stream {
            lock(&self.log).end_of_stream_emitted = true;
            let info = BufferInfo {
                offset: 0,
                size: 0,
                presentation_time_us: input.presentation_time_us,
                flags: BufferFlags::END_OF_STREAM,
            };
            return self.lend_output(Vec::new(), info);
        }

        let key_interval = match self.format.as_ref().map(|f| &f.params) {
            Some(FormatParams::Video { frame_rate, .. }) => (*frame_rate).max(1) as u64,
            _ => 1,
        };
        let mut flags = BufferFlags::NONE;
        if self.emitted % key_interval == 0 {
            flags.insert(BufferFlags::KEY_FRAME);
        }
        self.emitted += 1;

        // Header byte, input length, content hash.
        let mut payload = Vec::with_capacity(13);
        payload.push(if flags.is_key_frame() { b'K' } else { b'P' });
        payload.extend_from_slice(&(input.payload.len() as u32).to_le_bytes());
        payload.extend_from_slice(&fnv1a_64(&input.payload).to_le_bytes());
        let info = BufferInfo {
            offset: 0,
            size: payload.len(),
            presentation_time_us: input.presentation_time_us,
            flags,
        };
        self.lend_output(payload, info)
    }

    fn output_format(&self) -> SnapcutResult<MediaFormat> {
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| SnapcutError::encoder("output format requested before configure"))?;
        if !self.format_announced {
            return Err(SnapcutError::encoder("output format not available yet"));
        }
        Ok(format
            .clone()
            .with_codec_config(format!("{}-config", self.name).into_bytes()))
    }

    fn output_buffer(&self, index: usize) -> SnapcutResult<&[u8]> {
        self.outputs
            .get(&index)
            .map(|(data, _)| data.as_slice())
            .ok_or_else(|| SnapcutError::encoder(format!("output buffer {index} is not lent out")))
    }

    fn release_output_buffer(&mut self, index: usize) -> SnapcutResult<()> {
        if self.outputs.remove(&index).is_none() {
            return Err(SnapcutError::encoder(format!(
                "output buffer {index} released twice"
            )));
        }
        lock(&self.log).outputs_released += 1;
        Ok(())
    }

    fn stop(&mut self) -> SnapcutResult<()> {
        self.started = false;
        self.queue.clear();
        lock(&self.log).stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.released = true;
        self.queue.clear();
        self.outputs.clear();
        self.input_buffers.clear();
        lock(&self.log).releases += 1;
    }
}

/// Length-prefixed sample file writer.
///
/// Layout: magic, then per sample `track:u8 pts:i64 flags:u32 size:u32 data`,
/// all little endian.
#[derive(Debug)]
pub struct MemoryContainer {
    path: PathBuf,
    format: ContainerFormat,
    file: Option<BufWriter<File>>,
    fail_write_after: Option<u64>,
    log: Arc<Mutex<ContainerLog>>,
}

impl MemoryContainer {
    pub fn new(path: &Path, format: ContainerFormat, fail_write_after: Option<u64>) -> Self {
        let log = ContainerLog {
            path: path.to_path_buf(),
            ..Default::default()
        };
        Self {
            path: path.to_path_buf(),
            format,
            file: None,
            fail_write_after,
            log: Arc::new(Mutex::new(log)),
        }
    }

    pub fn log(&self) -> Arc<Mutex<ContainerLog>> {
        Arc::clone(&self.log)
    }
}

impl ContainerWriter for MemoryContainer {
    fn add_track(&mut self, format: &MediaFormat) -> SnapcutResult<usize> {
        let mut log = lock(&self.log);
        if log.starts > 0 {
            return Err(SnapcutError::muxer("add_track after start"));
        }
        log.tracks.push(format.kind());
        Ok(log.tracks.len() - 1)
    }

    fn start(&mut self) -> SnapcutResult<()> {
        if self.file.is_some() {
            return Err(SnapcutError::muxer("container started twice"));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = BufWriter::new(File::create(&self.path)?);
        file.write_all(MEMORY_CONTAINER_MAGIC)?;
        file.write_all(self.format.file_extension().as_bytes())?;
        self.file = Some(file);
        lock(&self.log).starts += 1;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> SnapcutResult<()> {
        let mut log = lock(&self.log);
        let Some(file) = self.file.as_mut() else {
            log.rejected_writes += 1;
            return Err(SnapcutError::muxer("write before start"));
        };
        if track >= log.tracks.len() {
            log.rejected_writes += 1;
            return Err(SnapcutError::muxer(format!("unknown track {track}")));
        }
        if self
            .fail_write_after
            .is_some_and(|limit| log.samples.len() as u64 >= limit)
        {
            return Err(SnapcutError::muxer(format!(
                "simulated write failure at sample {}",
                log.samples.len()
            )));
        }
        let payload = data.get(info.offset..info.offset + info.size).unwrap_or(data);
        file.write_all(&[track as u8])?;
        file.write_all(&info.presentation_time_us.to_le_bytes())?;
        file.write_all(&info.flags.bits().to_le_bytes())?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(payload)?;
        log.samples.push(SampleRecord {
            track,
            presentation_time_us: info.presentation_time_us,
            size: payload.len(),
            flags: info.flags,
        });
        Ok(())
    }

    fn stop(&mut self) -> SnapcutResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SnapcutError::muxer("stop before start"))?;
        file.flush()?;
        lock(&self.log).stops += 1;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        lock(&self.log).releases += 1;
    }
}

/// Backend built from [`LoopbackCodec`] and [`MemoryContainer`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    options: MemoryBackendOptions,
    codecs: Mutex<Vec<Arc<Mutex<CodecLog>>>>,
    containers: Mutex<Vec<Arc<Mutex<ContainerLog>>>>,
}

impl MemoryBackend {
    pub fn new(options: MemoryBackendOptions) -> Self {
        Self {
            options,
            codecs: Mutex::new(Vec::new()),
            containers: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &MemoryBackendOptions {
        &self.options
    }

    /// Snapshot of every codec created so far, in creation order.
    pub fn codec_logs(&self) -> Vec<CodecLog> {
        lock(&self.codecs).iter().map(|l| lock(l).clone()).collect()
    }

    /// Snapshot of every container created so far, in creation order.
    pub fn container_logs(&self) -> Vec<ContainerLog> {
        lock(&self.containers)
            .iter()
            .map(|l| lock(l).clone())
            .collect()
    }

    fn make_codec(&self, mime: &str, hardware: bool) -> Box<dyn Codec> {
        let prefix = if hardware { "loopback-hw" } else { "loopback" };
        let codec = LoopbackCodec::new(
            format!("{prefix}:{mime}"),
            mime,
            hardware,
            self.options.clone(),
        );
        lock(&self.codecs).push(codec.log());
        Box::new(codec)
    }
}

impl MediaBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create_hardware_encoder(&self, mime: &str) -> SnapcutResult<Box<dyn Codec>> {
        if !self.options.hardware_available {
            return Err(SnapcutError::unsupported(format!(
                "no hardware encoder for {mime}"
            )));
        }
        Ok(self.make_codec(mime, true))
    }

    fn create_software_encoder(&self, mime: &str) -> SnapcutResult<Box<dyn Codec>> {
        let available = if mime.starts_with("audio/") {
            self.options.audio_available
        } else {
            self.options.video_available
        };
        if !available {
            return Err(SnapcutError::unsupported(format!("no software encoder for {mime}")));
        }
        Ok(self.make_codec(mime, false))
    }

    fn create_container(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> SnapcutResult<Box<dyn ContainerWriter>> {
        let container = MemoryContainer::new(path, format, self.options.fail_write_after);
        lock(&self.containers).push(container.log());
        Ok(Box::new(container))
    }
}
