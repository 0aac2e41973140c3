use std::collections::HashSet;

use proptest::prelude::*;
use snapcut_export_model::{
    find_preset, preset_catalog, AudioCodec, ContainerFormat, ExportSettings, Platform,
    Resolution, SettingsError, VideoCodec,
};

#[test]
fn every_catalog_preset_validates() {
    for preset in preset_catalog() {
        assert_eq!(
            preset.settings.validate(),
            Ok(()),
            "preset {} should be exportable",
            preset.id
        );
    }
}

#[test]
fn catalog_ids_are_unique_and_resolvable() {
    let catalog = preset_catalog();
    let ids: HashSet<&str> = catalog.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids.len(), catalog.len());

    for preset in &catalog {
        assert_eq!(find_preset(&preset.id).as_ref(), Some(preset));
    }
}

#[test]
fn catalog_covers_every_platform() {
    let platforms: HashSet<Platform> = preset_catalog().iter().map(|p| p.platform).collect();
    for platform in [
        Platform::YouTube,
        Platform::Instagram,
        Platform::TikTok,
        Platform::Twitter,
        Platform::Web,
        Platform::Archive,
    ] {
        assert!(platforms.contains(&platform), "missing {platform:?}");
    }
}

#[test]
fn web_preset_uses_webm_with_opus() {
    let web = find_preset("web-webm").expect("web preset exists");
    assert_eq!(web.settings.container_format, ContainerFormat::Webm);
    assert_eq!(web.settings.video_codec, VideoCodec::Vp9);
    assert_eq!(web.settings.audio_codec, AudioCodec::Opus);
}

proptest! {
    #[test]
    fn validate_agrees_with_compatibility_table(
        video in prop::sample::select(VideoCodec::ALL.to_vec()),
        audio in prop::sample::select(AudioCodec::ALL.to_vec()),
        container in prop::sample::select(vec![ContainerFormat::Mp4, ContainerFormat::Webm]),
    ) {
        let settings = ExportSettings {
            resolution: Resolution::new(640, 360),
            video_codec: video,
            audio_codec: audio,
            container_format: container,
            ..Default::default()
        };
        let compatible = container.supports_video(video) && container.supports_audio(audio);
        match settings.validate() {
            Ok(()) => prop_assert!(compatible),
            Err(SettingsError::Incompatible { .. }) => prop_assert!(!compatible),
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
