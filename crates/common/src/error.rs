//! Error types shared across SlideReel crates.

use std::path::PathBuf;

/// Top-level error type for SlideReel operations.
#[derive(Debug, thiserror::Error)]
pub enum SlidereelError {
    #[error("Incomplete pipeline: {pending} of {total} slides are not ready for export")]
    IncompletePipeline { pending: usize, total: usize },

    #[error("No exportable slides: generate at least one slide before exporting")]
    NoSlides,

    #[error("Failed to load slide {index}: {message}")]
    FrameSource { index: u32, message: String },

    #[error("No compatible export format: {message}")]
    UnsupportedFormat { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Delivery error: {message}")]
    Delivery { message: String },

    #[error("Export cancelled")]
    Cancelled,

    #[error("An export is already in progress")]
    Busy,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SlidereelError.
pub type SlidereelResult<T> = Result<T, SlidereelError>;

/// Coarse failure class used for user-facing notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Precondition,
    ResourceAcquisition,
    UnsupportedFormat,
    Encoding,
    Audio,
    Cancelled,
    Internal,
}

impl ErrorCategory {
    pub fn title(self) -> &'static str {
        match self {
            ErrorCategory::Precondition => "Slides missing",
            ErrorCategory::ResourceAcquisition => "Could not load slides",
            ErrorCategory::UnsupportedFormat => "Format not supported",
            ErrorCategory::Encoding => "Video recording failed",
            ErrorCategory::Audio => "Audio track failed",
            ErrorCategory::Cancelled => "Export cancelled",
            ErrorCategory::Internal => "Export failed",
        }
    }
}

impl SlidereelError {
    pub fn frame_source(index: u32, msg: impl Into<String>) -> Self {
        Self::FrameSource {
            index,
            message: msg.into(),
        }
    }

    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Which failure class this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::IncompletePipeline { .. } | Self::NoSlides | Self::Busy => {
                ErrorCategory::Precondition
            }
            Self::FrameSource { .. } | Self::FileNotFound { .. } => {
                ErrorCategory::ResourceAcquisition
            }
            Self::UnsupportedFormat { .. } => ErrorCategory::UnsupportedFormat,
            Self::Encoder { .. } => ErrorCategory::Encoding,
            Self::Audio { .. } => ErrorCategory::Audio,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Render { .. }
            | Self::Delivery { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            SlidereelError::IncompletePipeline {
                pending: 1,
                total: 3
            }
            .category(),
            ErrorCategory::Precondition
        );
        assert_eq!(
            SlidereelError::audio("unreachable").category(),
            ErrorCategory::Audio
        );
        assert_eq!(
            SlidereelError::unsupported_format("none").category(),
            ErrorCategory::UnsupportedFormat
        );
        assert_eq!(
            SlidereelError::frame_source(2, "404").category(),
            ErrorCategory::ResourceAcquisition
        );
    }

    #[test]
    fn test_display_names_slide() {
        let err = SlidereelError::frame_source(4, "decode failed");
        assert_eq!(err.to_string(), "Failed to load slide 4: decode failed");
    }
}
