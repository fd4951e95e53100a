//! SlideReel CLI: export finished carousels to video.
//!
//! Usage:
//!   slidereel export <MANIFEST>   Render a carousel to MP4/WebM
//!   slidereel formats             List export formats and local support
//!   slidereel plan <MANIFEST>     Show the per-slide timing plan
//!   slidereel bundle <MANIFEST>   Write the slides and caption as a ZIP

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use slidereel_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "slidereel",
    about = "Turn generated image carousels into short videos",
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
    /// Export a carousel to video
    Export {
        /// Path to carousel.json or the directory holding it
        manifest: PathBuf,

        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Music track URL or path
        #[arg(long)]
        audio: Option<String>,

        /// Aspect preset: 1:1, 4:5 or 3:4
        #[arg(long)]
        aspect: Option<String>,

        /// Brand name used in the file name
        #[arg(long)]
        brand: Option<String>,

        /// Hook phrase used in the file name
        #[arg(long)]
        hook: Option<String>,
    },

    /// List export formats in preference order
    Formats,

    /// Show how long each slide is held
    Plan {
        /// Path to carousel.json or the directory holding it
        manifest: PathBuf,
    },

    /// Bundle slide images and caption into a ZIP
    Bundle {
        /// Path to carousel.json or the directory holding it
        manifest: PathBuf,

        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load();

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    slidereel_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Export {
            manifest,
            output,
            audio,
            aspect,
            brand,
            hook,
        } => {
            commands::export::run(
                &config,
                commands::export::ExportArgs {
                    manifest,
                    output,
                    audio,
                    aspect,
                    brand,
                    hook,
                },
            )
            .await
        }
        Commands::Formats => commands::formats::run(),
        Commands::Plan { manifest } => commands::plan::run(&config, manifest),
        Commands::Bundle { manifest, output } => {
            commands::bundle::run(&config, manifest, output).await
        }
    }
}
