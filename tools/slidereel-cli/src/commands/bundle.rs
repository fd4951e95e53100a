//! Bundle a carousel's slides and caption into a ZIP.

use std::path::PathBuf;
use std::sync::Arc;

use slidereel_carousel_model::{BrandContext, LoadedManifest};
use slidereel_common::config::AppConfig;
use slidereel_render_engine::bundle::{BundleExporter, BundleRequest};
use slidereel_render_engine::delivery::DirectorySink;
use slidereel_render_engine::frame_source::DefaultFetcher;

pub async fn run(config: &AppConfig, manifest: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let loaded = LoadedManifest::load(&manifest)
        .map_err(|e| anyhow::anyhow!("Failed to load carousel: {e}"))?;
    let output_dir = output.unwrap_or_else(|| config.output_dir.clone());

    let request = BundleRequest {
        slides: loaded.manifest.slides.clone(),
        caption: loaded.manifest.caption.clone(),
        brand: BrandContext::new(loaded.manifest.brand.clone(), loaded.manifest.hook.clone()),
    };

    let exporter = BundleExporter::new(
        Arc::new(DefaultFetcher::new()),
        Arc::new(DirectorySink::new(output_dir)),
    );
    let artifact = exporter.export(&request).await?;

    println!("Bundle saved: {}", artifact.path.display());
    println!("  Slides: {}", artifact.slides);
    if !artifact.skipped.is_empty() {
        println!("  Skipped (could not fetch): {:?}", artifact.skipped);
    }
    println!("  Caption: {}", if artifact.has_caption { "yes" } else { "no" });
    Ok(())
}
