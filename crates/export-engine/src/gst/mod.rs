//! GStreamer media backend.
//!
//! Encoders run as `appsrc ! <encoder> ! <parser> ! appsink` pipelines driven
//! through the app elements' action signals, which gives them the same
//! buffer-queue protocol as any other [`Codec`](crate::codec::Codec). The
//! container is an `appsrc`-per-track pipeline into `mp4mux` or `webmmux`,
//! launched once every track is known.

mod codec;
mod container;

use std::path::Path;
use std::sync::OnceLock;

use gstreamer as gst;

use snapcut_common::error::{SnapcutError, SnapcutResult};
use snapcut_export_model::ContainerFormat;

use crate::codec::{Codec, ContainerWriter, MediaBackend};

pub use codec::GstCodec;
pub use container::GstContainer;

/// How an encoder element expresses its bitrate property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BitrateUnit {
    Bps,
    Kbps,
}

/// One candidate encoder element.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EncoderElement {
    pub factory: &'static str,
    pub hardware: bool,
    pub bitrate: Option<(&'static str, BitrateUnit)>,
    /// Extra properties appended verbatim.
    pub extra: &'static str,
}

const fn element(
    factory: &'static str,
    hardware: bool,
    bitrate: Option<(&'static str, BitrateUnit)>,
    extra: &'static str,
) -> EncoderElement {
    EncoderElement {
        factory,
        hardware,
        bitrate,
        extra,
    }
}

const ENCODERS: &[(&str, EncoderElement)] = &[
    // Hardware first; lookup keeps table order.
    ("video/avc", element("vah264enc", true, Some(("bitrate", BitrateUnit::Kbps)), "")),
    ("video/avc", element("vaapih264enc", true, Some(("bitrate", BitrateUnit::Kbps)), "")),
    ("video/avc", element("nvh264enc", true, Some(("bitrate", BitrateUnit::Kbps)), "")),
    ("video/hevc", element("vah265enc", true, Some(("bitrate", BitrateUnit::Kbps)), "")),
    ("video/hevc", element("nvh265enc", true, Some(("bitrate", BitrateUnit::Kbps)), "")),
    ("video/x-vnd.on2.vp9", element("vavp9enc", true, Some(("bitrate", BitrateUnit::Kbps)), "")),
    ("video/av01", element("vaav1enc", true, Some(("bitrate", BitrateUnit::Kbps)), "")),
    (
        "video/avc",
        element("x264enc", false, Some(("bitrate", BitrateUnit::Kbps)), "speed-preset=medium"),
    ),
    ("video/hevc", element("x265enc", false, Some(("bitrate", BitrateUnit::Kbps)), "")),
    (
        "video/x-vnd.on2.vp9",
        element("vp9enc", false, Some(("target-bitrate", BitrateUnit::Bps)), "deadline=1"),
    ),
    ("video/av01", element("av1enc", false, Some(("target-bitrate", BitrateUnit::Kbps)), "")),
    ("audio/mp4a-latm", element("avenc_aac", false, Some(("bitrate", BitrateUnit::Bps)), "")),
    ("audio/mpeg", element("lamemp3enc", false, Some(("bitrate", BitrateUnit::Kbps)), "target=bitrate")),
    ("audio/opus", element("opusenc", false, Some(("bitrate", BitrateUnit::Bps)), "")),
    ("audio/flac", element("flacenc", false, None, "")),
];

/// Parser placed after the encoder so the output is access-unit aligned.
pub(crate) fn parser_for(mime: &str) -> Option<&'static str> {
    match mime {
        "video/avc" => Some("h264parse ! video/x-h264,stream-format=avc,alignment=au"),
        "video/hevc" => Some("h265parse ! video/x-h265,stream-format=hvc1,alignment=au"),
        "video/x-vnd.on2.vp9" => Some("vp9parse"),
        "video/av01" => Some("av1parse ! video/x-av1,stream-format=obu-stream,alignment=tu"),
        "audio/mp4a-latm" => Some("aacparse ! audio/mpeg,stream-format=raw"),
        "audio/mpeg" => Some("mpegaudioparse"),
        "audio/flac" => Some("flacparse"),
        _ => None,
    }
}

pub(crate) fn candidates(mime: &str, hardware: bool) -> impl Iterator<Item = &'static EncoderElement> + '_ {
    ENCODERS
        .iter()
        .filter(move |(m, e)| *m == mime && e.hardware == hardware)
        .map(|(_, e)| e)
}

pub(crate) fn init_gstreamer() -> SnapcutResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(SnapcutError::setup(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

pub(crate) fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Media backend on top of GStreamer.
#[derive(Debug, Default)]
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Self {
        Self
    }

    fn create_encoder(&self, mime: &str, hardware: bool) -> SnapcutResult<Box<dyn Codec>> {
        init_gstreamer()?;
        let found = candidates(mime, hardware)
            .find(|e| gst::ElementFactory::find(e.factory).is_some())
            .ok_or_else(|| {
                SnapcutError::unsupported(format!(
                    "no {} GStreamer encoder for {mime}",
                    if hardware { "hardware" } else { "software" }
                ))
            })?;
        tracing::debug!(element = found.factory, mime, "Selected GStreamer encoder");
        Ok(Box::new(GstCodec::new(*found)))
    }
}

impl MediaBackend for GstBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn is_available(&self) -> bool {
        init_gstreamer().is_ok()
            && ["appsrc", "appsink", "mp4mux"]
                .iter()
                .all(|f| gst::ElementFactory::find(f).is_some())
    }

    fn create_hardware_encoder(&self, mime: &str) -> SnapcutResult<Box<dyn Codec>> {
        self.create_encoder(mime, true)
    }

    fn create_software_encoder(&self, mime: &str) -> SnapcutResult<Box<dyn Codec>> {
        self.create_encoder(mime, false)
    }

    fn create_container(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> SnapcutResult<Box<dyn ContainerWriter>> {
        init_gstreamer()?;
        let muxer = container::muxer_element(format);
        if gst::ElementFactory::find(muxer).is_none() {
            return Err(SnapcutError::unsupported(format!(
                "GStreamer element {muxer} is not installed"
            )));
        }
        Ok(Box::new(GstContainer::new(path, format)))
    }
}
