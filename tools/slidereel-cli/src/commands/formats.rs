//! List export formats and whether the local ffmpeg can produce them.

use slidereel_render_engine::encoder::{
    negotiate_format, CodecCapabilities, FfmpegCapabilities, FORMAT_PREFERENCES,
};
use slidereel_render_engine::ffmpeg::command_exists;

pub fn run() -> anyhow::Result<()> {
    println!("SlideReel Export Formats");
    println!("{}", "=".repeat(50));

    if !command_exists("ffmpeg") {
        println!("[WARN] ffmpeg not found in PATH; video export is unavailable.");
        return Ok(());
    }

    let capabilities = FfmpegCapabilities::probe();
    for (rank, format) in FORMAT_PREFERENCES.iter().enumerate() {
        let status = if capabilities.is_supported(format) {
            "OK"
        } else {
            "--"
        };
        println!(
            "[{status}] {}. {} ({} + {})",
            rank + 1,
            format.mime,
            format.video.encoder(),
            format.audio.encoder()
        );
    }

    println!();
    match negotiate_format(&capabilities) {
        Ok(format) => println!("Exports will use: {format}"),
        Err(e) => println!("{e}"),
    }
    Ok(())
}
