//! Output aspect-ratio presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed output canvas sizes offered for carousel videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectPreset {
    /// 1:1, 1080x1080.
    #[default]
    #[serde(rename = "1:1")]
    Square,
    /// 4:5, 1080x1350.
    #[serde(rename = "4:5")]
    Portrait,
    /// 3:4, 1080x1440.
    #[serde(rename = "3:4")]
    Tall,
}

impl AspectPreset {
    pub const ALL: [AspectPreset; 3] = [Self::Square, Self::Portrait, Self::Tall];

    /// Output dimensions in pixels (width, height).
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Square => (1080, 1080),
            Self::Portrait => (1080, 1350),
            Self::Tall => (1080, 1440),
        }
    }

    pub fn as_ratio(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "4:5",
            Self::Tall => "3:4",
        }
    }
}

impl fmt::Display for AspectPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ratio())
    }
}

/// Unknown aspect-ratio string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown aspect ratio '{0}'. Use: 1:1, 4:5, 3:4")]
pub struct ParseAspectError(pub String);

impl FromStr for AspectPreset {
    type Err = ParseAspectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" | "square" => Ok(Self::Square),
            "4:5" | "portrait" => Ok(Self::Portrait),
            "3:4" | "tall" => Ok(Self::Tall),
            other => Err(ParseAspectError(other.to_string())),
        }
    }
}
