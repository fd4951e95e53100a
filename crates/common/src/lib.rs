//! SlideReel Common Utilities
//!
//! Shared infrastructure for all SlideReel crates:
//! - Error types and result aliases
//! - Frame pacing and progress throttling clocks
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
