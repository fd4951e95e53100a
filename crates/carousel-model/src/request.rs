//! Export request: everything one export job is allowed to read.

use serde::{Deserialize, Serialize};

use crate::aspect::AspectPreset;
use crate::slide::{ordered, Readiness, Slide};

/// Brand metadata used only to name the output file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandContext {
    /// Brand name.
    #[serde(default)]
    pub name: Option<String>,

    /// Short "hook" phrase of the carousel.
    #[serde(default)]
    pub hook: Option<String>,
}

impl BrandContext {
    pub fn new(name: Option<String>, hook: Option<String>) -> Self {
        Self { name, hook }
    }
}

/// One user-initiated export. Immutable for the lifetime of the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Slides in any order; the pipeline renders them by ascending index.
    pub slides: Vec<Slide>,

    /// Optional music track.
    #[serde(default)]
    pub audio_url: Option<String>,

    /// Brand context for the output name.
    #[serde(default)]
    pub brand: BrandContext,

    /// Output canvas preset.
    #[serde(default)]
    pub aspect: AspectPreset,
}

impl ExportRequest {
    pub fn new(slides: Vec<Slide>) -> Self {
        Self {
            slides,
            audio_url: None,
            brand: BrandContext::default(),
            aspect: AspectPreset::default(),
        }
    }

    pub fn with_audio(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn with_brand(mut self, brand: BrandContext) -> Self {
        self.brand = brand;
        self
    }

    pub fn with_aspect(mut self, aspect: AspectPreset) -> Self {
        self.aspect = aspect;
        self
    }

    /// Audio URL if one was supplied and is non-blank.
    pub fn audio(&self) -> Option<&str> {
        self.audio_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::of(&self.slides)
    }

    /// Slides in render order.
    pub fn ordered_slides(&self) -> Vec<&Slide> {
        ordered(&self.slides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_audio_is_ignored() {
        let request = ExportRequest::new(vec![Slide::done(0, "a.png")]).with_audio("   ");
        assert_eq!(request.audio(), None);

        let request = request.with_audio(" https://cdn.example.com/song.mp3 ");
        assert_eq!(request.audio(), Some("https://cdn.example.com/song.mp3"));
    }

    #[test]
    fn test_default_aspect_is_square() {
        let request: ExportRequest =
            serde_json::from_str(r#"{"slides":[{"index":0,"image":"a.png","status":"done"}]}"#)
                .unwrap();
        assert_eq!(request.aspect, AspectPreset::Square);
        assert!(request.readiness().is_complete());
    }
}
