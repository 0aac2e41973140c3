//! Export settings: resolution, codecs, container, and bitrates.
//!
//! Settings are immutable once an export starts. [`ExportSettings::validate`]
//! is the single gate that decides whether a combination can be encoded.

use serde::{Deserialize, Serialize};

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of luma samples.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of one 4:2:0 frame in bytes.
    pub fn yuv420_len(&self) -> usize {
        self.pixel_count() * 3 / 2
    }

    /// Size of one RGBA frame in bytes.
    pub fn rgba_len(&self) -> usize {
        self.pixel_count() * 4
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 4] = [Self::H264, Self::H265, Self::Vp9, Self::Av1];

    /// MIME type used to look up an encoder.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::H264 => "video/avc",
            Self::H265 => "video/hevc",
            Self::Vp9 => "video/x-vnd.on2.vp9",
            Self::Av1 => "video/av01",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "h265" | "hevc" => Ok(Self::H265),
            "vp9" => Ok(Self::Vp9),
            "av1" => Ok(Self::Av1),
            other => Err(SettingsError::UnknownName {
                kind: "video codec",
                value: other.to_string(),
            }),
        }
    }
}

/// Audio codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
    Flac,
}

impl AudioCodec {
    pub const ALL: [AudioCodec; 4] = [Self::Aac, Self::Mp3, Self::Opus, Self::Flac];

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Aac => "audio/mp4a-latm",
            Self::Mp3 => "audio/mpeg",
            Self::Opus => "audio/opus",
            Self::Flac => "audio/flac",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Flac => "flac",
        }
    }
}

impl std::str::FromStr for AudioCodec {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aac" => Ok(Self::Aac),
            "mp3" => Ok(Self::Mp3),
            "opus" => Ok(Self::Opus),
            "flac" => Ok(Self::Flac),
            other => Err(SettingsError::UnknownName {
                kind: "audio codec",
                value: other.to_string(),
            }),
        }
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Webm,
}

impl ContainerFormat {
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
        }
    }

    /// Whether this container can carry the given video codec.
    pub fn supports_video(&self, codec: VideoCodec) -> bool {
        match self {
            Self::Mp4 => matches!(codec, VideoCodec::H264 | VideoCodec::H265 | VideoCodec::Av1),
            Self::Webm => matches!(codec, VideoCodec::Vp9 | VideoCodec::Av1),
        }
    }

    /// Whether this container can carry the given audio codec.
    pub fn supports_audio(&self, codec: AudioCodec) -> bool {
        match self {
            Self::Mp4 => true,
            Self::Webm => codec == AudioCodec::Opus,
        }
    }
}

impl std::str::FromStr for ContainerFormat {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            other => Err(SettingsError::UnknownName {
                kind: "container format",
                value: other.to_string(),
            }),
        }
    }
}

fn default_audio_channels() -> u16 {
    2
}

/// Complete description of the file an export produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Output frame size.
    pub resolution: Resolution,

    /// Output frame rate (frames per second).
    pub frame_rate: u32,

    /// Target video bitrate in kbps.
    pub video_bitrate_kbps: u32,

    pub video_codec: VideoCodec,

    pub audio_codec: AudioCodec,

    /// Target audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    pub audio_sample_rate_hz: u32,

    /// Interleaved channel count of the audio track.
    #[serde(default = "default_audio_channels")]
    pub audio_channels: u16,

    pub container_format: ContainerFormat,

    /// Try hardware encoders before software ones.
    pub hardware_acceleration: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1920, 1080),
            frame_rate: 30,
            video_bitrate_kbps: 8000,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            audio_bitrate_kbps: 192,
            audio_sample_rate_hz: 48_000,
            audio_channels: 2,
            container_format: ContainerFormat::Mp4,
            hardware_acceleration: true,
        }
    }
}

/// Highest frame rate accepted by [`ExportSettings::validate`].
pub const MAX_FRAME_RATE: u32 = 240;

impl ExportSettings {
    /// Check that these settings describe something an encoder and muxer can produce.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 {
            return Err(SettingsError::Invalid {
                message: format!("resolution {} has a zero dimension", self.resolution),
            });
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(SettingsError::Invalid {
                message: format!(
                    "resolution {} must have even dimensions for 4:2:0 output",
                    self.resolution
                ),
            });
        }
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(SettingsError::Invalid {
                message: format!(
                    "frame rate {} outside 1..={MAX_FRAME_RATE}",
                    self.frame_rate
                ),
            });
        }
        if self.video_bitrate_kbps == 0 {
            return Err(SettingsError::Invalid {
                message: "video bitrate must be positive".to_string(),
            });
        }
        if self.audio_sample_rate_hz == 0 || self.audio_channels == 0 {
            return Err(SettingsError::Invalid {
                message: "audio sample rate and channel count must be positive".to_string(),
            });
        }
        if !self.container_format.supports_video(self.video_codec) {
            return Err(SettingsError::Incompatible {
                codec: self.video_codec.as_str(),
                container: self.container_format.file_extension(),
            });
        }
        if !self.container_format.supports_audio(self.audio_codec) {
            return Err(SettingsError::Incompatible {
                codec: self.audio_codec.as_str(),
                container: self.container_format.file_extension(),
            });
        }
        Ok(())
    }

    pub fn video_bitrate_bps(&self) -> u32 {
        self.video_bitrate_kbps.saturating_mul(1000)
    }

    pub fn audio_bitrate_bps(&self) -> u32 {
        self.audio_bitrate_kbps.saturating_mul(1000)
    }
}

/// Errors produced while parsing or validating export settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid export settings: {message}")]
    Invalid { message: String },

    #[error("{codec} cannot be stored in a {container} container")]
    Incompatible {
        codec: &'static str,
        container: &'static str,
    },

    #[error("Unknown {kind}: {value}")]
    UnknownName { kind: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert_eq!(ExportSettings::default().validate(), Ok(()));
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let settings = ExportSettings {
            resolution: Resolution::new(1921, 1080),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { .. })
        ));
    }

    #[test]
    fn test_vp9_in_mp4_rejected() {
        let settings = ExportSettings {
            video_codec: VideoCodec::Vp9,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(SettingsError::Incompatible {
                codec: "vp9",
                container: "mp4"
            })
        );
    }

    #[test]
    fn test_webm_requires_opus() {
        let mut settings = ExportSettings {
            video_codec: VideoCodec::Vp9,
            container_format: ContainerFormat::Webm,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        settings.audio_codec = AudioCodec::Opus;
        assert_eq!(settings.validate(), Ok(()));
    }

    #[test]
    fn test_frame_rate_bounds() {
        let mut settings = ExportSettings {
            frame_rate: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        settings.frame_rate = MAX_FRAME_RATE + 1;
        assert!(settings.validate().is_err());
        settings.frame_rate = MAX_FRAME_RATE;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_codec_names_parse() {
        assert_eq!("HEVC".parse::<VideoCodec>().unwrap(), VideoCodec::H265);
        assert_eq!("opus".parse::<AudioCodec>().unwrap(), AudioCodec::Opus);
        assert_eq!("webm".parse::<ContainerFormat>().unwrap(), ContainerFormat::Webm);
        assert!("mkv".parse::<ContainerFormat>().is_err());
    }

    #[test]
    fn test_settings_deserialization_defaults_channels() {
        let mut value = serde_json::to_value(ExportSettings::default()).unwrap();
        value.as_object_mut().unwrap().remove("audio_channels");
        let parsed: ExportSettings = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.audio_channels, 2);
    }

    #[test]
    fn test_frame_sizes() {
        let res = Resolution::new(4, 2);
        assert_eq!(res.yuv420_len(), 12);
        assert_eq!(res.rgba_len(), 32);
    }
}
