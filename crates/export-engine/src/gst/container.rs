//! Container writer on an appsrc-per-track muxing pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;

use snapcut_common::error::{SnapcutError, SnapcutResult};
use snapcut_export_model::ContainerFormat;

use super::{escape_path, hex};
use crate::codec::{BufferInfo, ContainerWriter, FormatParams, MediaFormat, TrackKind};

const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn muxer_element(format: ContainerFormat) -> &'static str {
    match format {
        ContainerFormat::Mp4 => "mp4mux",
        ContainerFormat::Webm => "webmmux",
    }
}

/// Caps describing an encoded track, as the muxer expects them.
pub(crate) fn track_caps(format: &MediaFormat) -> SnapcutResult<String> {
    let mut caps = match format.mime.as_str() {
        "video/avc" => "video/x-h264,stream-format=avc,alignment=au".to_string(),
        "video/hevc" => "video/x-h265,stream-format=hvc1,alignment=au".to_string(),
        "video/x-vnd.on2.vp9" => "video/x-vp9".to_string(),
        "video/av01" => "video/x-av1,stream-format=obu-stream,alignment=tu".to_string(),
        "audio/mp4a-latm" => "audio/mpeg,mpegversion=4,stream-format=raw".to_string(),
        "audio/mpeg" => "audio/mpeg,mpegversion=1,layer=3".to_string(),
        "audio/opus" => "audio/x-opus,channel-mapping-family=0".to_string(),
        "audio/flac" => "audio/x-flac,framed=true".to_string(),
        other => {
            return Err(SnapcutError::unsupported(format!(
                "no container caps for {other}"
            )))
        }
    };
    match format.params {
        FormatParams::Video {
            width,
            height,
            frame_rate,
        } => caps.push_str(&format!(
            ",width={width},height={height},framerate={frame_rate}/1"
        )),
        FormatParams::Audio {
            sample_rate_hz,
            channels,
        } => caps.push_str(&format!(",rate={sample_rate_hz},channels={channels}")),
    }
    if let Some(config) = format.codec_config.as_deref().filter(|c| !c.is_empty()) {
        caps.push_str(&format!(",codec_data=(buffer){}", hex(config)));
    }
    Ok(caps)
}

/// Build the muxing pipeline for the registered tracks.
pub(crate) fn container_launch(
    format: ContainerFormat,
    path: &Path,
    tracks: &[MediaFormat],
) -> SnapcutResult<String> {
    let mut launch = String::new();
    for (index, track) in tracks.iter().enumerate() {
        let caps = track_caps(track)?;
        launch.push_str(&format!(
            "appsrc name=track{index} format=time is-live=false caps=\"{caps}\" ! queue ! mux. "
        ));
    }
    let muxer = match format {
        ContainerFormat::Mp4 => "mp4mux faststart=true",
        ContainerFormat::Webm => "webmmux",
    };
    launch.push_str(&format!(
        "{muxer} name=mux ! filesink location=\"{}\"",
        escape_path(path)
    ));
    Ok(launch)
}

/// MP4/WebM writer fed one appsrc per track.
pub struct GstContainer {
    path: PathBuf,
    format: ContainerFormat,
    tracks: Vec<MediaFormat>,
    pipeline: Option<gst::Pipeline>,
    sources: Vec<gst::Element>,
    started: bool,
}

impl GstContainer {
    pub(crate) fn new(path: &Path, format: ContainerFormat) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            tracks: Vec::new(),
            pipeline: None,
            sources: Vec::new(),
            started: false,
        }
    }

    fn pipeline(&self) -> SnapcutResult<&gst::Pipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| SnapcutError::muxer("container is not running"))
    }

    /// Wait for EOS to reach the sink so the file gets its index.
    fn wait_for_eos(&self, pipeline: &gst::Pipeline) -> SnapcutResult<()> {
        let Some(bus) = pipeline.bus() else {
            return Ok(());
        };
        let start = std::time::Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= EOS_DRAIN_TIMEOUT {
                tracing::warn!(path = %self.path.display(), "EOS drain timed out after 10s");
                return Ok(());
            }
            let remaining = gst::ClockTime::from_nseconds((EOS_DRAIN_TIMEOUT - elapsed).as_nanos() as u64);
            match bus.timed_pop(remaining) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::debug!(path = %self.path.display(), "Muxer drained");
                        return Ok(());
                    }
                    gst::MessageView::Error(e) => {
                        return Err(SnapcutError::muxer(format!(
                            "muxer error while finalizing: {}",
                            e.error()
                        )));
                    }
                    _ => {}
                },
                None => {
                    tracing::warn!(path = %self.path.display(), "EOS drain timed out after 10s");
                    return Ok(());
                }
            }
        }
    }
}

impl ContainerWriter for GstContainer {
    fn add_track(&mut self, format: &MediaFormat) -> SnapcutResult<usize> {
        if self.started {
            return Err(SnapcutError::muxer("add_track after start"));
        }
        // Reject early rather than at start.
        track_caps(format)?;
        self.tracks.push(format.clone());
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> SnapcutResult<()> {
        if self.started {
            return Err(SnapcutError::muxer("container started twice"));
        }
        let launch = container_launch(self.format, &self.path, &self.tracks)?;
        tracing::debug!(%launch, "Building muxer pipeline");

        let element = gst::parse::launch(&launch)
            .map_err(|e| SnapcutError::muxer(format!("Failed to build muxer: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| SnapcutError::muxer("Launch string did not produce a pipeline"))?;
        let sources = (0..self.tracks.len())
            .map(|i| {
                pipeline
                    .by_name(&format!("track{i}"))
                    .ok_or_else(|| SnapcutError::muxer(format!("muxer pipeline lost track{i}")))
            })
            .collect::<SnapcutResult<Vec<_>>>()?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            SnapcutError::muxer(format!("Failed to start muxer: {e:?}"))
        })?;
        self.pipeline = Some(pipeline);
        self.sources = sources;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> SnapcutResult<()> {
        self.pipeline()?;
        let source = self
            .sources
            .get(track)
            .ok_or_else(|| SnapcutError::muxer(format!("unknown track {track}")))?;
        let payload = data
            .get(info.offset..info.offset + info.size)
            .ok_or_else(|| SnapcutError::muxer("sample range outside buffer"))?;

        let mut buffer = gst::Buffer::from_mut_slice(payload.to_vec());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_useconds(
                info.presentation_time_us.max(0) as u64,
            ));
            let is_video = self.tracks.get(track).map(MediaFormat::kind) == Some(TrackKind::Video);
            if is_video && !info.flags.is_key_frame() {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }
        let flow = source.emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]);
        if flow != gst::FlowReturn::Ok {
            return Err(SnapcutError::muxer(format!(
                "track {track} refused sample: {flow:?}"
            )));
        }
        Ok(())
    }

    fn stop(&mut self) -> SnapcutResult<()> {
        let pipeline = self.pipeline()?.clone();
        for source in &self.sources {
            let flow = source.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
            if flow != gst::FlowReturn::Ok {
                tracing::warn!(?flow, "appsrc refused end-of-stream");
            }
        }
        self.wait_for_eos(&pipeline)?;
        pipeline.set_state(gst::State::Null).map_err(|e| {
            SnapcutError::muxer(format!("Failed to stop muxer: {e:?}"))
        })?;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to tear down muxer");
            }
        }
        self.sources.clear();
    }
}
