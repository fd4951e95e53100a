//! Output file naming: `{brand}-{hook}-{YYYY-MM-DD}.{ext}`.

use chrono::NaiveDate;
use slidereel_carousel_model::BrandContext;

pub const DEFAULT_BRAND: &str = "carousel";
pub const DEFAULT_VIDEO_HOOK: &str = "video";
pub const DEFAULT_BUNDLE_HOOK: &str = "slides";
pub const MAX_HOOK_CHARS: usize = 30;

/// Lowercase, collapse every run of characters outside `[a-z0-9]` into a
/// single `-`, and trim leading/trailing `-`.
pub fn sanitize_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Build the artifact file name. Empty or unusable brand/hook segments fall
/// back to the defaults.
pub fn output_file_name(
    brand: &BrandContext,
    default_hook: &str,
    date: NaiveDate,
    extension: &str,
) -> String {
    let brand_segment = brand
        .name
        .as_deref()
        .map(sanitize_segment)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_BRAND.to_string());

    let hook_segment = brand
        .hook
        .as_deref()
        .map(|hook| {
            let truncated: String = sanitize_segment(hook).chars().take(MAX_HOOK_CHARS).collect();
            truncated.trim_end_matches('-').to_string()
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_hook.to_string());

    format!(
        "{brand_segment}-{hook_segment}-{}.{extension}",
        date.format("%Y-%m-%d")
    )
}

/// Today's local date.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
