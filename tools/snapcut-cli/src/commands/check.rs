//! Check media backend availability.

use snapcut_export_engine::{MediaBackend, MemoryBackend};

pub fn run() -> anyhow::Result<()> {
    println!("Snapcut System Check");
    println!("{}", "=".repeat(50));

    let memory = MemoryBackend::default();
    println!("[OK] Backend {}: always available (dry runs)", memory.name());

    let real_ok = check_gstreamer();

    println!();
    if real_ok {
        println!("Real encoders are available. Snapcut is ready.");
    } else {
        println!("Only dry-run exports are possible. See above for details.");
    }
    Ok(())
}

#[cfg(feature = "gst")]
fn check_gstreamer() -> bool {
    use snapcut_export_model::{AudioCodec, VideoCodec};

    let backend = snapcut_export_engine::gst::GstBackend::new();
    if !backend.is_available() {
        println!("[WARN] Backend {}: GStreamer or its app/mp4 plugins missing", backend.name());
        return false;
    }
    println!("[OK] Backend {}", backend.name());

    let mimes = VideoCodec::ALL
        .iter()
        .map(|c| c.mime_type())
        .chain(AudioCodec::ALL.iter().map(|c| c.mime_type()));
    for mime in mimes {
        let hardware = backend.create_hardware_encoder(mime).is_ok();
        let software = backend.create_software_encoder(mime).is_ok();
        let status = if software || hardware { "OK" } else { "MISSING" };
        println!(
            "     [{status}] {mime:<22} hardware: {}  software: {}",
            if hardware { "yes" } else { "no" },
            if software { "yes" } else { "no" },
        );
    }
    true
}

#[cfg(not(feature = "gst"))]
fn check_gstreamer() -> bool {
    println!("[WARN] Backend gstreamer: not compiled in (rebuild with --features gst)");
    false
}
