//! List export presets.

use snapcut_export_model::preset_catalog;

pub fn run(json: bool) -> anyhow::Result<()> {
    let presets = preset_catalog();
    if json {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }

    println!("Snapcut Export Presets");
    println!("{}", "=".repeat(50));
    for preset in &presets {
        let s = &preset.settings;
        println!("{:<16} {}", preset.id, preset.name);
        println!(
            "     {} {} @ {} fps, {} {} kbps + {} {} kbps ({})",
            s.container_format.file_extension(),
            s.resolution,
            s.frame_rate,
            s.video_codec.as_str(),
            s.video_bitrate_kbps,
            s.audio_codec.as_str(),
            s.audio_bitrate_kbps,
            preset.platform.as_str(),
        );
    }
    Ok(())
}
