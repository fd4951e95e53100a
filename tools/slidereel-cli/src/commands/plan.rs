//! Print the timing plan of a carousel export.

use std::path::PathBuf;

use slidereel_carousel_model::LoadedManifest;
use slidereel_common::config::AppConfig;
use slidereel_render_engine::compositor::{HoldFinalSlide, RenderLoop};

pub fn run(config: &AppConfig, manifest: PathBuf) -> anyhow::Result<()> {
    let loaded = LoadedManifest::load(&manifest)
        .map_err(|e| anyhow::anyhow!("Failed to load carousel: {e}"))?;
    let request = loaded.to_export_request();
    let slides = request.ordered_slides();

    let render = RenderLoop::new(
        config.export.fps,
        Box::new(HoldFinalSlide {
            standard: config.export.standard_dwell(),
            final_slide: config.export.final_dwell(),
        }),
    );
    let schedule = render.schedule();
    let plan = render.plan(slides.len());

    println!("Carousel: {}", loaded.root.display());
    let (width, height) = request.aspect.dimensions();
    println!(
        "  Canvas: {width}x{height} ({}) @ {}fps",
        request.aspect,
        schedule.fps()
    );
    println!();

    let mut start = std::time::Duration::ZERO;
    for (slide, dwell) in slides.iter().zip(&plan) {
        println!(
            "  #{:<3} {:>6.2}s  +{:.2}s  {:>4} frames  {}",
            slide.index,
            start.as_secs_f64(),
            dwell.as_secs_f64(),
            schedule.frames_for(*dwell),
            if slide.is_ready() { "ready" } else { "NOT READY" }
        );
        start += *dwell;
    }

    println!();
    println!(
        "Total: {:.2}s, {} frames",
        render.total_duration(slides.len()).as_secs_f64(),
        render.total_frames(slides.len())
    );

    let readiness = request.readiness();
    if !readiness.is_complete() {
        println!(
            "{} of {} slides are not ready; export would be refused.",
            readiness.pending(),
            readiness.total
        );
    }
    Ok(())
}
