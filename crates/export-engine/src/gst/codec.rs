//! Buffer-queue encoder on an appsrc/appsink pipeline.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use gstreamer::prelude::*;
use gstreamer as gst;

use snapcut_common::error::{SnapcutError, SnapcutResult};

use super::{hex, parser_for, BitrateUnit, EncoderElement};
use crate::codec::{BufferFlags, BufferInfo, Codec, FormatParams, MediaFormat, OutputPoll};

/// Raw buffers allowed to wait inside appsrc.
const MAX_QUEUED_INPUTS: u64 = 8;
const INPUT_SLOTS: usize = 4;

/// Build the launch line for one encoder.
pub(crate) fn encoder_launch(element: &EncoderElement, format: &MediaFormat) -> String {
    let raw_caps = match format.params {
        FormatParams::Video {
            width,
            height,
            frame_rate,
        } => format!(
            "video/x-raw,format=NV12,width={width},height={height},framerate={frame_rate}/1"
        ),
        FormatParams::Audio {
            sample_rate_hz,
            channels,
        } => format!(
            "audio/x-raw,format=S16LE,layout=interleaved,rate={sample_rate_hz},channels={channels}"
        ),
    };
    let convert = match format.params {
        FormatParams::Video { .. } => "videoconvert",
        FormatParams::Audio { .. } => "audioconvert ! audioresample",
    };

    let mut encoder = element.factory.to_string();
    if let Some((prop, unit)) = element.bitrate {
        let value = match unit {
            BitrateUnit::Bps => format.bitrate_bps,
            BitrateUnit::Kbps => format.bitrate_bps / 1000,
        };
        encoder.push_str(&format!(" {prop}={value}"));
    }
    if !element.extra.is_empty() {
        encoder.push(' ');
        encoder.push_str(element.extra);
    }

    let parser = parser_for(&format.mime)
        .map(|p| format!(" ! {p}"))
        .unwrap_or_default();

    format!(
        "appsrc name=src format=time is-live=false block=false caps=\"{raw_caps}\" \
         ! queue ! {convert} ! {encoder}{parser} \
         ! appsink name=sink sync=false emit-signals=false"
    )
}

/// One encoder element wrapped as a [`Codec`].
pub struct GstCodec {
    element: EncoderElement,
    name: String,
    format: Option<MediaFormat>,
    output_format: Option<MediaFormat>,
    pipeline: Option<gst::Pipeline>,
    appsrc: Option<gst::Element>,
    appsink: Option<gst::Element>,
    input_buffers: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    ready: VecDeque<(Vec<u8>, BufferInfo)>,
    outputs: HashMap<usize, (Vec<u8>, BufferInfo)>,
    next_output: usize,
    end_of_stream_sent: bool,
    end_of_stream_emitted: bool,
}

impl GstCodec {
    pub(crate) fn new(element: EncoderElement) -> Self {
        Self {
            element,
            name: element.factory.to_string(),
            format: None,
            output_format: None,
            pipeline: None,
            appsrc: None,
            appsink: None,
            input_buffers: Vec::new(),
            free_inputs: VecDeque::new(),
            ready: VecDeque::new(),
            outputs: HashMap::new(),
            next_output: 0,
            end_of_stream_sent: false,
            end_of_stream_emitted: false,
        }
    }

    fn appsrc(&self) -> SnapcutResult<&gst::Element> {
        self.appsrc
            .as_ref()
            .ok_or_else(|| SnapcutError::encoder(format!("{} is not configured", self.name)))
    }

    fn appsink(&self) -> SnapcutResult<&gst::Element> {
        self.appsink
            .as_ref()
            .ok_or_else(|| SnapcutError::encoder(format!("{} is not configured", self.name)))
    }

    /// Surface an error posted on the bus, if any.
    fn check_bus(&self) -> SnapcutResult<()> {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return Ok(());
        };
        if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(e) = msg.view() {
                return Err(SnapcutError::encoder(format!("{}: {}", self.name, e.error())));
            }
        }
        Ok(())
    }

    /// Record the output format from the first sample's caps and queue its
    /// codec data as a config buffer.
    fn capture_format(&mut self, sample: &gst::Sample) -> SnapcutResult<()> {
        let format = self
            .format
            .clone()
            .ok_or_else(|| SnapcutError::encoder("sample before configure"))?;
        let codec_data = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .and_then(|s| s.get::<gst::Buffer>("codec_data").ok())
            .and_then(|buffer| {
                let map = buffer.map_readable().ok()?;
                let bytes = map.as_slice().to_vec();
                Some(bytes)
            });

        let output = match codec_data {
            Some(data) => {
                tracing::debug!(codec = %self.name, config = %hex(&data), "Encoder codec data");
                self.ready.push_back((
                    data.clone(),
                    BufferInfo {
                        offset: 0,
                        size: data.len(),
                        presentation_time_us: 0,
                        flags: BufferFlags::CODEC_CONFIG,
                    },
                ));
                format.with_codec_config(data)
            }
            None => format,
        };
        self.output_format = Some(output);
        Ok(())
    }

    fn queue_sample(&mut self, sample: &gst::Sample) -> SnapcutResult<()> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| SnapcutError::encoder(format!("{} produced an empty sample", self.name)))?;
        let map = buffer
            .map_readable()
            .map_err(|e| SnapcutError::encoder(format!("cannot map output buffer: {e}")))?;
        let data = map.as_slice().to_vec();

        let mut flags = BufferFlags::NONE;
        if buffer.flags().contains(gst::BufferFlags::HEADER) {
            flags.insert(BufferFlags::CODEC_CONFIG);
        } else if !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
            flags.insert(BufferFlags::KEY_FRAME);
        }
        let info = BufferInfo {
            offset: 0,
            size: data.len(),
            presentation_time_us: buffer.pts().map(|t| t.useconds() as i64).unwrap_or(0),
            flags,
        };
        self.ready.push_back((data, info));
        Ok(())
    }

    fn lend(&mut self, data: Vec<u8>, info: BufferInfo) -> OutputPoll {
        let index = self.next_output;
        self.next_output += 1;
        self.outputs.insert(index, (data, info));
        OutputPoll::Buffer { index, info }
    }
}

impl Codec for GstCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_hardware(&self) -> bool {
        self.element.hardware
    }

    fn configure(&mut self, format: &MediaFormat) -> SnapcutResult<()> {
        super::init_gstreamer()?;
        let launch = encoder_launch(&self.element, format);
        tracing::debug!(codec = %self.name, %launch, "Building encoder pipeline");

        let element = gst::parse::launch(&launch)
            .map_err(|e| SnapcutError::encoder(format!("Failed to build encoder: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| SnapcutError::encoder("Launch string did not produce a pipeline"))?;
        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| SnapcutError::encoder("encoder pipeline has no appsrc"))?;
        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| SnapcutError::encoder("encoder pipeline has no appsink"))?;

        let capacity = match format.params {
            FormatParams::Video { width, height, .. } => width as usize * height as usize * 3 / 2,
            FormatParams::Audio {
                sample_rate_hz,
                channels,
            } => (sample_rate_hz as usize * channels as usize * 2 / 10).max(8192),
        };
        self.input_buffers = vec![vec![0u8; capacity]; INPUT_SLOTS];
        self.free_inputs = (0..INPUT_SLOTS).collect();
        self.format = Some(format.clone());
        self.pipeline = Some(pipeline);
        self.appsrc = Some(appsrc);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn start(&mut self) -> SnapcutResult<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| SnapcutError::encoder("start before configure"))?;
        pipeline.set_state(gst::State::Playing).map_err(|e| {
            SnapcutError::encoder(format!("Failed to start {}: {e:?}", self.name))
        })?;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> SnapcutResult<Option<usize>> {
        if self.end_of_stream_sent {
            return Ok(None);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let level = self.appsrc()?.property::<u64>("current-level-buffers");
            if level < MAX_QUEUED_INPUTS {
                if let Some(index) = self.free_inputs.pop_front() {
                    return Ok(Some(index));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
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
        let data = self
            .input_buffers
            .get(index)
            .and_then(|b| b.get(..size))
            .ok_or_else(|| SnapcutError::encoder(format!("bad input buffer {index}/{size}")))?
            .to_vec();
        self.free_inputs.push_back(index);

        let appsrc = self.appsrc()?.clone();
        if flags.is_end_of_stream() {
            if !data.is_empty() {
                return Err(SnapcutError::encoder("end-of-stream input must be empty"));
            }
            let flow = appsrc.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
            if flow != gst::FlowReturn::Ok {
                return Err(SnapcutError::encoder(format!("end-of-stream refused: {flow:?}")));
            }
            self.end_of_stream_sent = true;
            return Ok(());
        }

        let mut buffer = gst::Buffer::from_mut_slice(data);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_useconds(presentation_time_us.max(0) as u64));
        }
        let flow = appsrc.emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]);
        if flow != gst::FlowReturn::Ok {
            return Err(SnapcutError::encoder(format!(
                "{} refused input: {flow:?}",
                self.name
            )));
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> SnapcutResult<OutputPoll> {
        self.check_bus()?;
        if self.output_format.is_some() {
            if let Some((data, info)) = self.ready.pop_front() {
                return Ok(self.lend(data, info));
            }
        }

        let appsink = self.appsink()?.clone();
        let timeout_ns = timeout.as_nanos() as u64;
        let sample = appsink.emit_by_name::<Option<gst::Sample>>("try-pull-sample", &[&timeout_ns]);
        match sample {
            Some(sample) => {
                let first = self.output_format.is_none();
                if first {
                    self.capture_format(&sample)?;
                }
                self.queue_sample(&sample)?;
                if first {
                    return Ok(OutputPoll::FormatChanged);
                }
                match self.ready.pop_front() {
                    Some((data, info)) => Ok(self.lend(data, info)),
                    None => Ok(OutputPoll::TryAgainLater),
                }
            }
            None => {
                let drained = appsink.property::<bool>("eos");
                if drained && self.end_of_stream_sent && !self.end_of_stream_emitted {
                    if self.output_format.is_none() {
                        // Nothing was ever encoded; still report a format so the track exists.
                        self.output_format = self.format.clone();
                        return Ok(OutputPoll::FormatChanged);
                    }
                    self.end_of_stream_emitted = true;
                    let info = BufferInfo {
                        offset: 0,
                        size: 0,
                        presentation_time_us: 0,
                        flags: BufferFlags::END_OF_STREAM,
                    };
                    return Ok(self.lend(Vec::new(), info));
                }
                Ok(OutputPoll::TryAgainLater)
            }
        }
    }

    fn output_format(&self) -> SnapcutResult<MediaFormat> {
        self.output_format
            .clone()
            .ok_or_else(|| SnapcutError::encoder("output format not available yet"))
    }

    fn output_buffer(&self, index: usize) -> SnapcutResult<&[u8]> {
        self.outputs
            .get(&index)
            .map(|(data, _)| data.as_slice())
            .ok_or_else(|| SnapcutError::encoder(format!("output buffer {index} is not lent out")))
    }

    fn release_output_buffer(&mut self, index: usize) -> SnapcutResult<()> {
        self.outputs
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| SnapcutError::encoder(format!("output buffer {index} released twice")))
    }

    fn stop(&mut self) -> SnapcutResult<()> {
        if let Some(pipeline) = self.pipeline.as_ref() {
            pipeline.set_state(gst::State::Null).map_err(|e| {
                SnapcutError::encoder(format!("Failed to stop {}: {e:?}", self.name))
            })?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(codec = %self.name, error = ?e, "Failed to tear down encoder");
            }
        }
        self.appsrc = None;
        self.appsink = None;
        self.ready.clear();
        self.outputs.clear();
        self.input_buffers.clear();
        self.free_inputs.clear();
    }
}
