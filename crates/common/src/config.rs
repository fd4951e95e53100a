//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where exported videos and bundles are written.
    pub output_dir: PathBuf,

    /// Default export settings.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Output frame rate.
    pub fps: u32,

    /// Dwell time of every slide except the last (milliseconds).
    pub standard_dwell_ms: u64,

    /// Dwell time of the final slide (milliseconds).
    pub final_dwell_ms: u64,

    /// Target video bitrate.
    pub video_bitrate_kbps: u32,

    /// Target audio bitrate.
    pub audio_bitrate_kbps: u32,

    /// Gain applied to the music track [0.0, 1.0].
    pub audio_volume: f64,

    /// How often the encoder flushes a fragment to the chunk buffer.
    pub flush_interval_ms: u64,

    /// Minimum spacing between render-loop progress reports.
    pub progress_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "slidereel=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            standard_dwell_ms: 4000,
            final_dwell_ms: 6000,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
            audio_volume: 0.9,
            flush_interval_ms: 250,
            progress_interval_ms: 120,
        }
    }
}

impl ExportDefaults {
    pub fn standard_dwell(&self) -> Duration {
        Duration::from_millis(self.standard_dwell_ms)
    }

    pub fn final_dwell(&self) -> Duration {
        Duration::from_millis(self.final_dwell_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Reject settings the render loop cannot honour.
    pub fn validate(&self) -> Result<(), crate::error::SlidereelError> {
        if self.fps == 0 || self.fps > 120 {
            return Err(crate::error::SlidereelError::config(format!(
                "fps must be within 1..=120 (got {})",
                self.fps
            )));
        }
        if self.standard_dwell_ms == 0 || self.final_dwell_ms == 0 {
            return Err(crate::error::SlidereelError::config(
                "slide dwell times must be non-zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.audio_volume) {
            return Err(crate::error::SlidereelError::config(format!(
                "audio_volume must be within [0.0, 1.0] (got {})",
                self.audio_volume
            )));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, config_path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("slidereel").join("config.json")
}

/// Default export directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DOWNLOAD_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join("Downloads")
        });
    base.join("slidereel")
}
