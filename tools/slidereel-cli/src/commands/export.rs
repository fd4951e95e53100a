//! Export a carousel to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use slidereel_carousel_model::{AspectPreset, LoadedManifest};
use slidereel_common::config::AppConfig;
use slidereel_render_engine::delivery::DirectorySink;
use slidereel_render_engine::{CancelFlag, ExportEvent, Exporter, NoticeLevel};

pub struct ExportArgs {
    pub manifest: PathBuf,
    pub output: Option<PathBuf>,
    pub audio: Option<String>,
    pub aspect: Option<String>,
    pub brand: Option<String>,
    pub hook: Option<String>,
}

pub async fn run(config: &AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    config.export.validate()?;

    let loaded = LoadedManifest::load(&args.manifest)
        .map_err(|e| anyhow::anyhow!("Failed to load carousel: {e}"))?;

    let mut request = loaded.to_export_request();
    if let Some(audio) = args.audio {
        request = request.with_audio(audio);
    }
    if let Some(aspect) = args.aspect {
        request = request.with_aspect(aspect.parse::<AspectPreset>()?);
    }
    if args.brand.is_some() {
        request.brand.name = args.brand;
    }
    if args.hook.is_some() {
        request.brand.hook = args.hook;
    }

    let output_dir = args.output.unwrap_or_else(|| config.output_dir.clone());
    let (width, height) = request.aspect.dimensions();

    println!("Exporting carousel at: {}", loaded.root.display());
    println!("  Slides: {}", request.slides.len());
    println!("  Canvas: {width}x{height} ({})", request.aspect);
    println!("  Music: {}", request.audio().unwrap_or("none"));
    println!("  Output: {}", output_dir.display());

    let exporter = Exporter::new(config.export.clone(), Arc::new(DirectorySink::new(output_dir)))
        .with_events(Box::new(|event: &ExportEvent| match event {
            ExportEvent::Progress(p) => {
                print!("\r  [{:>3}%] {:<20}", p.percent, p.label);
                let _ = std::io::stdout().flush();
            }
            ExportEvent::Notice(n) if n.level != NoticeLevel::Info => {
                println!("\n{}: {}", n.title, n.detail);
            }
            ExportEvent::Notice(_) => {}
        }));

    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling export");
            trigger.cancel();
        }
    });

    let artifact = exporter.run(&request, &cancel).await?;
    println!(
        "Export complete: {} ({} frames, {:.1}s, {})",
        artifact.path.display(),
        artifact.frames,
        artifact.rendered.as_secs_f64(),
        artifact.format
    );
    Ok(())
}
