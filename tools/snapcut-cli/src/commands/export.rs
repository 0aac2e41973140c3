//! Export a project to video.

use std::path::PathBuf;
use std::sync::Arc;

use snapcut_common::config::{AppConfig, ExportDefaults};
use snapcut_export_engine::{
    ExportService, MediaBackend, MemoryBackend, TestPattern, TestPatternProvider,
};
use snapcut_export_model::{
    find_preset, ContainerFormat, ExportSettings, ExportStatus, ProjectSnapshot, Resolution,
    VideoCodec,
};

/// Command-line options for `snapcut export`.
pub struct ExportOptions {
    pub project: Option<PathBuf>,
    pub duration_ms: u64,
    pub preset: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub codec: Option<String>,
    pub container: Option<String>,
    pub pattern: String,
    pub audio: bool,
    /// `Some` when `--hw` or `--no-hw` was given.
    pub hardware: Option<bool>,
    pub dry_run: bool,
    pub output: Option<PathBuf>,
}

pub async fn run(config: &AppConfig, options: ExportOptions) -> anyhow::Result<()> {
    let project = match &options.project {
        Some(path) => ProjectSnapshot::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?,
        None => ProjectSnapshot::new("untitled", options.duration_ms),
    };

    let preset_id = options
        .preset
        .clone()
        .unwrap_or_else(|| config.export.preset.clone());
    let preset = find_preset(&preset_id).ok_or_else(|| {
        anyhow::anyhow!("Unknown preset: {preset_id}. Run `snapcut presets` for the list")
    })?;
    let settings = apply_overrides(preset.settings, &config.export, &options)?;

    let pattern = match options.pattern.as_str() {
        "bars" => TestPattern::Bars,
        "solid" => TestPattern::Solid([32, 96, 160, 255]),
        other => {
            return Err(anyhow::anyhow!("Unknown pattern: {other}. Use: bars, solid"));
        }
    };

    let output_path = options.output.clone().unwrap_or_else(|| {
        config.output_dir.join(format!(
            "{}.{}",
            project.name,
            settings.container_format.file_extension()
        ))
    });

    let backend = select_backend(options.dry_run)?;
    let service = ExportService::new(
        backend,
        config.engine.clone(),
        Arc::new(TestPatternProvider::new(pattern, options.audio)),
    );

    println!("Exporting project: {}", project.name);
    println!("  Backend: {}", service.backend_name());
    println!("  Output: {}", output_path.display());
    println!(
        "  Format: {} {} / {}",
        settings.container_format.file_extension(),
        settings.video_codec.as_str(),
        settings.audio_codec.as_str()
    );
    println!("  Resolution: {} @ {} fps", settings.resolution, settings.frame_rate);
    if !settings.hardware_acceleration {
        println!("  Encoders: software only");
    }

    let mut stream = service.export_project_custom(project, settings, output_path.clone())?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;
    let mut last_status = None;
    let mut last_message = None;

    loop {
        tokio::select! {
            progress = stream.next() => {
                let Some(p) = progress else { break };
                match p.status {
                    ExportStatus::Encoding | ExportStatus::Finalizing => print!(
                        "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
                        p.progress_percent,
                        p.current_frame,
                        p.total_frames,
                        p.estimated_time_remaining_ms as f64 / 1000.0,
                    ),
                    _ => tracing::debug!(status = %p.status, "Export status"),
                }
                last_status = Some(p.status);
                last_message = p.message;
            }
            _ = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                println!("\n  Cancelling...");
                service.cancel_export();
            }
        }
    }

    match last_status {
        Some(ExportStatus::Completed) => {
            println!("\nExport complete: {}", output_path.display());
            Ok(())
        }
        Some(ExportStatus::Cancelled) => {
            println!("\nExport cancelled");
            Ok(())
        }
        _ => Err(anyhow::anyhow!(
            "Export failed: {}",
            last_message.unwrap_or_else(|| "no terminal event received".to_string())
        )),
    }
}

fn apply_overrides(
    mut settings: ExportSettings,
    defaults: &ExportDefaults,
    options: &ExportOptions,
) -> anyhow::Result<ExportSettings> {
    settings.hardware_acceleration = options
        .hardware
        .unwrap_or(settings.hardware_acceleration && defaults.hardware_acceleration);
    if options.width.is_some() || options.height.is_some() {
        settings.resolution = Resolution::new(
            options.width.unwrap_or(settings.resolution.width),
            options.height.unwrap_or(settings.resolution.height),
        );
    }
    if let Some(fps) = options.fps {
        settings.frame_rate = fps;
    }
    if let Some(codec) = &options.codec {
        settings.video_codec = codec.parse::<VideoCodec>()?;
    }
    if let Some(container) = &options.container {
        settings.container_format = container.parse::<ContainerFormat>()?;
    }
    Ok(settings)
}

fn select_backend(dry_run: bool) -> anyhow::Result<Arc<dyn MediaBackend>> {
    if dry_run {
        return Ok(Arc::new(MemoryBackend::default()));
    }
    real_backend()
}

#[cfg(feature = "gst")]
fn real_backend() -> anyhow::Result<Arc<dyn MediaBackend>> {
    let backend = snapcut_export_engine::gst::GstBackend::new();
    if !backend.is_available() {
        return Err(anyhow::anyhow!(
            "GStreamer is not usable here. Run `snapcut check`, or pass --dry-run"
        ));
    }
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "gst"))]
fn real_backend() -> anyhow::Result<Arc<dyn MediaBackend>> {
    Err(anyhow::anyhow!(
        "Built without real encoders. Rebuild with --features gst, or pass --dry-run"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ExportOptions {
        ExportOptions {
            project: None,
            duration_ms: 1000,
            preset: None,
            width: None,
            height: None,
            fps: None,
            codec: None,
            container: None,
            pattern: "bars".to_string(),
            audio: false,
            hardware: None,
            dry_run: true,
            output: None,
        }
    }

    fn preset_settings() -> ExportSettings {
        find_preset("youtube-1080p").unwrap().settings
    }

    #[test]
    fn test_config_can_disable_hardware() {
        let defaults = ExportDefaults {
            hardware_acceleration: false,
            ..Default::default()
        };
        assert!(preset_settings().hardware_acceleration);
        let settings = apply_overrides(preset_settings(), &defaults, &options()).unwrap();
        assert!(!settings.hardware_acceleration);

        let settings =
            apply_overrides(preset_settings(), &ExportDefaults::default(), &options()).unwrap();
        assert!(settings.hardware_acceleration);
    }

    #[test]
    fn test_flags_override_config() {
        let software = ExportOptions {
            hardware: Some(false),
            ..options()
        };
        let settings =
            apply_overrides(preset_settings(), &ExportDefaults::default(), &software).unwrap();
        assert!(!settings.hardware_acceleration);

        let defaults = ExportDefaults {
            hardware_acceleration: false,
            ..Default::default()
        };
        let hardware = ExportOptions {
            hardware: Some(true),
            ..options()
        };
        let settings = apply_overrides(preset_settings(), &defaults, &hardware).unwrap();
        assert!(settings.hardware_acceleration);
    }

    #[test]
    fn test_format_overrides() {
        let overridden = ExportOptions {
            width: Some(640),
            fps: Some(24),
            codec: Some("vp9".to_string()),
            container: Some("webm".to_string()),
            ..options()
        };
        let settings =
            apply_overrides(preset_settings(), &ExportDefaults::default(), &overridden).unwrap();
        assert_eq!(settings.resolution, Resolution::new(640, 1080));
        assert_eq!(settings.frame_rate, 24);
        assert_eq!(settings.video_codec, VideoCodec::Vp9);
        assert_eq!(settings.container_format, ContainerFormat::Webm);

        let bad = ExportOptions {
            codec: Some("mpeg2".to_string()),
            ..options()
        };
        assert!(apply_overrides(preset_settings(), &ExportDefaults::default(), &bad).is_err());
    }
}
