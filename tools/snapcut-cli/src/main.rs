//! Snapcut CLI: export projects and inspect the export engine.
//!
//! Usage:
//!   snapcut presets            List the export preset catalog
//!   snapcut check              Report media backend availability
//!   snapcut export [OPTIONS]   Export a project (or a synthetic timeline)

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "snapcut",
    about = "Video export pipeline: render, encode, and mux",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the export preset catalog
    Presets {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report which media backends are usable
    Check,

    /// Export a project to video
    Export {
        /// Project snapshot (JSON with name and duration_ms)
        #[arg(long, conflicts_with = "duration_ms")]
        project: Option<PathBuf>,

        /// Duration of a synthetic project, in milliseconds
        #[arg(long, default_value = "5000")]
        duration_ms: u64,

        /// Preset id (see `snapcut presets`)
        #[arg(long)]
        preset: Option<String>,

        /// Override output width
        #[arg(long)]
        width: Option<u32>,

        /// Override output height
        #[arg(long)]
        height: Option<u32>,

        /// Override frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Override video codec: h264|h265|vp9|av1
        #[arg(long)]
        codec: Option<String>,

        /// Override container: mp4|webm
        #[arg(long)]
        container: Option<String>,

        /// Test pattern to render: bars|solid
        #[arg(long, default_value = "bars")]
        pattern: String,

        /// Include a silent audio track
        #[arg(long)]
        audio: bool,

        /// Try hardware encoders even if the config disables them
        #[arg(long, conflicts_with = "no_hw")]
        hw: bool,

        /// Encode in software only
        #[arg(long)]
        no_hw: bool,

        /// Use the in-process backend instead of real encoders
        #[arg(long)]
        dry_run: bool,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = snapcut_common::config::AppConfig::load();

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    snapcut_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Presets { json } => commands::presets::run(json),
        Commands::Check => commands::check::run(),
        Commands::Export {
            project,
            duration_ms,
            preset,
            width,
            height,
            fps,
            codec,
            container,
            pattern,
            audio,
            hw,
            no_hw,
            dry_run,
            output,
        } => {
            let options = commands::export::ExportOptions {
                project,
                duration_ms,
                preset,
                width,
                height,
                fps,
                codec,
                container,
                pattern,
                audio,
                hardware: match (hw, no_hw) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                dry_run,
                output,
            };
            commands::export::run(&config, options).await
        }
    }
}
