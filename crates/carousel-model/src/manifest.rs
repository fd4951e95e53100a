//! Carousel manifest (`carousel.json`).
//!
//! A manifest describes a finished carousel on disk so it can be exported
//! without the studio UI. Relative image paths are resolved against the
//! manifest's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aspect::AspectPreset;
use crate::request::{BrandContext, ExportRequest};
use crate::slide::Slide;

/// On-disk description of a carousel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarouselManifest {
    /// Brand name.
    #[serde(default)]
    pub brand: Option<String>,

    /// Hook phrase.
    #[serde(default)]
    pub hook: Option<String>,

    /// Post caption, shipped alongside slides in bundles.
    #[serde(default)]
    pub caption: Option<String>,

    /// Output aspect preset.
    #[serde(default)]
    pub aspect: AspectPreset,

    /// Default music track.
    #[serde(default)]
    pub audio_url: Option<String>,

    /// Slides.
    pub slides: Vec<Slide>,
}

/// A manifest together with where it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    /// Directory containing the manifest file.
    pub root: PathBuf,

    /// Parsed manifest with image locators resolved.
    pub manifest: CarouselManifest,
}

impl LoadedManifest {
    /// Load a manifest file, or `carousel.json` inside a directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let manifest_path = if path.is_dir() {
            path.join("carousel.json")
        } else {
            path.to_path_buf()
        };
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let content =
            std::fs::read_to_string(&manifest_path).map_err(|e| ManifestError::IoError {
                path: manifest_path.clone(),
                source: e,
            })?;
        let mut manifest: CarouselManifest =
            serde_json::from_str(&content).map_err(|e| ManifestError::ParseError {
                path: manifest_path.clone(),
                source: e,
            })?;

        if manifest.slides.is_empty() {
            return Err(ManifestError::ValidationError {
                message: format!("{} lists no slides", manifest_path.display()),
            });
        }

        for slide in &mut manifest.slides {
            if let Some(image) = slide.image.take() {
                slide.image = Some(resolve_locator(&root, &image));
            }
        }
        manifest.audio_url = manifest
            .audio_url
            .take()
            .filter(|url| !url.trim().is_empty())
            .map(|url| resolve_locator(&root, &url));

        Ok(Self { root, manifest })
    }

    /// Build the export request this manifest describes.
    pub fn to_export_request(&self) -> ExportRequest {
        let mut request = ExportRequest::new(self.manifest.slides.clone())
            .with_brand(BrandContext::new(
                self.manifest.brand.clone(),
                self.manifest.hook.clone(),
            ))
            .with_aspect(self.manifest.aspect);
        request.audio_url = self.manifest.audio_url.clone();
        request
    }
}

/// Resolve a slide or audio locator: URLs and absolute paths pass through,
/// relative paths are joined onto the manifest directory.
pub fn resolve_locator(root: &Path, locator: &str) -> String {
    let trimmed = locator.trim();
    if trimmed.contains("://") || Path::new(trimmed).is_absolute() {
        return trimmed.to_string();
    }
    root.join(trimmed).display().to_string()
}

/// Errors loading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid manifest: {message}")]
    ValidationError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slide::SlideStatus;

    #[test]
    fn test_resolve_locator() {
        let root = Path::new("/srv/carousel");
        assert_eq!(
            resolve_locator(root, "https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
        assert_eq!(resolve_locator(root, "/abs/b.png"), "/abs/b.png");
        assert_eq!(
            resolve_locator(root, "slides/c.png"),
            "/srv/carousel/slides/c.png"
        );
    }

    #[test]
    fn test_load_directory_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("carousel.json"),
            r#"{
                "brand": "Acme Coffee",
                "hook": "Five brews you missed",
                "aspect": "4:5",
                "slides": [
                    {"index": 1, "image": "two.png", "status": "done"},
                    {"index": 0, "image": "one.png", "status": "done"},
                    {"index": 2, "status": "generating"}
                ]
            }"#,
        )
        .unwrap();

        let loaded = LoadedManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.manifest.aspect, AspectPreset::Portrait);
        let first = &loaded.manifest.slides[0];
        assert_eq!(
            first.image.as_deref(),
            Some(dir.path().join("two.png").display().to_string().as_str())
        );
        assert_eq!(loaded.manifest.slides[2].status, SlideStatus::Generating);

        let request = loaded.to_export_request();
        assert_eq!(request.brand.name.as_deref(), Some("Acme Coffee"));
        assert_eq!(request.readiness().pending(), 1);
    }

    #[test]
    fn test_relative_audio_resolves_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carousel.json");
        std::fs::write(
            &path,
            r#"{"audio_url": "music/loop.mp3", "slides": [{"index": 0, "image": "a.png", "status": "done"}]}"#,
        )
        .unwrap();

        let request = LoadedManifest::load(&path).unwrap().to_export_request();
        let expected = dir.path().join("music/loop.mp3").display().to_string();
        assert_eq!(request.audio_url.as_deref(), Some(expected.as_str()));

        std::fs::write(
            &path,
            r#"{"audio_url": "  ", "slides": [{"index": 0, "image": "a.png", "status": "done"}]}"#,
        )
        .unwrap();
        let loaded = LoadedManifest::load(&path).unwrap();
        assert_eq!(loaded.manifest.audio_url, None);
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"slides": []}"#).unwrap();
        assert!(matches!(
            LoadedManifest::load(&path),
            Err(ManifestError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_missing_manifest_reports_path() {
        let err = LoadedManifest::load("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
