//! Helpers for locating and probing the ffmpeg toolchain.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

/// Whether `binary` resolves on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Names of the encoders the local ffmpeg build ships, or `None` when
/// ffmpeg cannot be run.
pub fn list_encoders() -> Option<HashSet<String>> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse the table printed by `ffmpeg -encoders`.
///
/// Rows look like ` V....D libx264   libx264 H.264 / AVC ...`; the legend
/// above the `------` separator is skipped.
pub fn parse_encoder_list(raw: &str) -> HashSet<String> {
    raw.lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            let is_flag_column = flags.len() == 6
                && flags
                    .chars()
                    .all(|c| matches!(c, 'V' | 'A' | 'S' | 'F' | 'X' | 'B' | 'D' | '.'));
            is_flag_column.then(|| name.to_string())
        })
        .collect()
}

/// Whether the media file at `path` carries at least one audio stream.
///
/// Returns `None` when ffprobe is unavailable so callers can skip the check.
pub async fn probe_has_audio_stream(path: &Path) -> Option<bool> {
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=codec_type",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return Some(false);
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    Some(raw.lines().any(|line| line.trim() == "audio"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encoder_list() {
        let raw = "Encoders:\n V..... = Video\n A..... = Audio\n ------\n V....D libx264              libx264 H.264 / AVC\n V....D libvpx-vp9           libvpx VP9\n A....D aac                  AAC (Advanced Audio Coding)\n A....D libopus              libopus Opus\n";
        let encoders = parse_encoder_list(raw);
        assert!(encoders.contains("libx264"));
        assert!(encoders.contains("libvpx-vp9"));
        assert!(encoders.contains("aac"));
        assert!(encoders.contains("libopus"));
        assert!(!encoders.contains("V....."));
        assert!(!encoders.contains("="));
    }

    #[test]
    fn test_parse_encoder_list_without_table() {
        assert!(parse_encoder_list("ffmpeg: not found").is_empty());
    }
}
