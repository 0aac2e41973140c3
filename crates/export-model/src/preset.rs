//! Static catalog of platform export presets.

use serde::{Deserialize, Serialize};

use crate::settings::{
    AudioCodec, ContainerFormat, ExportSettings, Resolution, VideoCodec,
};

/// Publishing target a preset is tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    YouTube,
    Instagram,
    TikTok,
    Twitter,
    Web,
    Archive,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::Instagram => "Instagram",
            Self::TikTok => "TikTok",
            Self::Twitter => "X / Twitter",
            Self::Web => "Web",
            Self::Archive => "Archive",
        }
    }
}

/// A named bundle of export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPreset {
    /// Stable identifier (kebab-case), e.g. `youtube-1080p`.
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub description: String,
    pub settings: ExportSettings,
}

struct PresetSpec {
    id: &'static str,
    name: &'static str,
    platform: Platform,
    description: &'static str,
    resolution: Resolution,
    frame_rate: u32,
    video_bitrate_kbps: u32,
    video_codec: VideoCodec,
    audio_codec: AudioCodec,
    audio_bitrate_kbps: u32,
    container_format: ContainerFormat,
}

const CATALOG: &[PresetSpec] = &[
    PresetSpec {
        id: "youtube-1080p",
        name: "YouTube 1080p",
        platform: Platform::YouTube,
        description: "1920x1080 H.264/AAC at 30 fps",
        resolution: Resolution::new(1920, 1080),
        frame_rate: 30,
        video_bitrate_kbps: 8_000,
        video_codec: VideoCodec::H264,
        audio_codec: AudioCodec::Aac,
        audio_bitrate_kbps: 192,
        container_format: ContainerFormat::Mp4,
    },
    PresetSpec {
        id: "youtube-4k",
        name: "YouTube 4K",
        platform: Platform::YouTube,
        description: "3840x2160 H.265/AAC at 30 fps",
        resolution: Resolution::new(3840, 2160),
        frame_rate: 30,
        video_bitrate_kbps: 35_000,
        video_codec: VideoCodec::H265,
        audio_codec: AudioCodec::Aac,
        audio_bitrate_kbps: 256,
        container_format: ContainerFormat::Mp4,
    },
    PresetSpec {
        id: "instagram-feed",
        name: "Instagram Feed",
        platform: Platform::Instagram,
        description: "1080x1080 square H.264/AAC at 30 fps",
        resolution: Resolution::new(1080, 1080),
        frame_rate: 30,
        video_bitrate_kbps: 5_000,
        video_codec: VideoCodec::H264,
        audio_codec: AudioCodec::Aac,
        audio_bitrate_kbps: 128,
        container_format: ContainerFormat::Mp4,
    },
    PresetSpec {
        id: "instagram-reels",
        name: "Instagram Reels",
        platform: Platform::Instagram,
        description: "1080x1920 vertical H.264/AAC at 30 fps",
        resolution: Resolution::new(1080, 1920),
        frame_rate: 30,
        video_bitrate_kbps: 6_000,
        video_codec: VideoCodec::H264,
        audio_codec: AudioCodec::Aac,
        audio_bitrate_kbps: 128,
        container_format: ContainerFormat::Mp4,
    },
    PresetSpec {
        id: "tiktok",
        name: "TikTok",
        platform: Platform::TikTok,
        description: "1080x1920 vertical H.264/AAC at 30 fps",
        resolution: Resolution::new(1080, 1920),
        frame_rate: 30,
        video_bitrate_kbps: 6_000,
        video_codec: VideoCodec::H264,
        audio_codec: AudioCodec::Aac,
        audio_bitrate_kbps: 128,
        container_format: ContainerFormat::Mp4,
    },
    PresetSpec {
        id: "twitter-720p",
        name: "X / Twitter 720p",
        platform: Platform::Twitter,
        description: "1280x720 H.264/AAC at 30 fps",
        resolution: Resolution::new(1280, 720),
        frame_rate: 30,
        video_bitrate_kbps: 5_000,
        video_codec: VideoCodec::H264,
        audio_codec: AudioCodec::Aac,
        audio_bitrate_kbps: 128,
        container_format: ContainerFormat::Mp4,
    },
    PresetSpec {
        id: "web-webm",
        name: "Web (WebM)",
        platform: Platform::Web,
        description: "1280x720 VP9/Opus for browsers",
        resolution: Resolution::new(1280, 720),
        frame_rate: 30,
        video_bitrate_kbps: 2_500,
        video_codec: VideoCodec::Vp9,
        audio_codec: AudioCodec::Opus,
        audio_bitrate_kbps: 128,
        container_format: ContainerFormat::Webm,
    },
    PresetSpec {
        id: "archive-hevc",
        name: "Archive (HEVC)",
        platform: Platform::Archive,
        description: "1920x1080 H.265/FLAC at 60 fps",
        resolution: Resolution::new(1920, 1080),
        frame_rate: 60,
        video_bitrate_kbps: 20_000,
        video_codec: VideoCodec::H265,
        audio_codec: AudioCodec::Flac,
        audio_bitrate_kbps: 0,
        container_format: ContainerFormat::Mp4,
    },
];

impl PresetSpec {
    fn to_preset(&self) -> ExportPreset {
        ExportPreset {
            id: self.id.to_string(),
            name: self.name.to_string(),
            platform: self.platform,
            description: self.description.to_string(),
            settings: ExportSettings {
                resolution: self.resolution,
                frame_rate: self.frame_rate,
                video_bitrate_kbps: self.video_bitrate_kbps,
                video_codec: self.video_codec,
                audio_codec: self.audio_codec,
                audio_bitrate_kbps: self.audio_bitrate_kbps,
                audio_sample_rate_hz: 48_000,
                audio_channels: 2,
                container_format: self.container_format,
                hardware_acceleration: true,
            },
        }
    }
}

/// All built-in presets, in display order.
pub fn preset_catalog() -> Vec<ExportPreset> {
    CATALOG.iter().map(PresetSpec::to_preset).collect()
}

/// Look up a preset by id (case-insensitive).
pub fn find_preset(id: &str) -> Option<ExportPreset> {
    CATALOG
        .iter()
        .find(|spec| spec.id.eq_ignore_ascii_case(id.trim()))
        .map(PresetSpec::to_preset)
}
