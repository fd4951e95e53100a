//! Slide records produced by the image-generation flow.

use serde::{Deserialize, Serialize};

/// Generation status of a single slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SlideStatus {
    #[default]
    Pending,
    Generating,
    Done,
    Error,
}

/// One still image in an ordered carousel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    /// Sequence position (0-based).
    pub index: u32,

    /// Image locator (URL or path). Present only once the slide is done.
    #[serde(default, alias = "imageUrl", alias = "image_url")]
    pub image: Option<String>,

    /// Generation status.
    #[serde(default)]
    pub status: SlideStatus,
}

impl Slide {
    /// A finished slide pointing at `image`.
    pub fn done(index: u32, image: impl Into<String>) -> Self {
        Self {
            index,
            image: Some(image.into()),
            status: SlideStatus::Done,
        }
    }

    /// A slide that has not produced an image yet.
    pub fn pending(index: u32) -> Self {
        Self {
            index,
            image: None,
            status: SlideStatus::Pending,
        }
    }

    /// Whether the slide can be rendered: done and carrying an image.
    pub fn is_ready(&self) -> bool {
        self.status == SlideStatus::Done
            && self.image.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// Image locator of a ready slide.
    pub fn ready_image(&self) -> Option<&str> {
        if self.is_ready() {
            self.image.as_deref()
        } else {
            None
        }
    }
}

/// Readiness summary for a slide sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: usize,
    pub total: usize,
}

impl Readiness {
    pub fn of(slides: &[Slide]) -> Self {
        Self {
            ready: slides.iter().filter(|s| s.is_ready()).count(),
            total: slides.len(),
        }
    }

    pub fn pending(&self) -> usize {
        self.total - self.ready
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.ready == self.total
    }
}

/// Slides sorted by sequence position.
pub fn ordered(slides: &[Slide]) -> Vec<&Slide> {
    let mut sorted: Vec<&Slide> = slides.iter().collect();
    sorted.sort_by_key(|s| s.index);
    sorted
}
