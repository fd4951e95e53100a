//! SlideReel Render Engine
//!
//! Real-time export pipeline that turns an ordered carousel of still
//! images into a single video file.
//!
//! # Pipeline Architecture
//!
//! ```text
//! slides ──► FrameSourceResolver ──► FrameSource[]
//!                                         │
//! audio url ──► AudioTrackBuilder ──┐     │
//!                                   │     ▼
//!                                   │  RenderLoop ── paces frames at fps
//!                                   │     │  (DurationPolicy per slide)
//!                                   ▼     ▼
//!                              EncoderSession (negotiated format)
//!                                         │
//!                                         ▼
//!                              ArtifactSink ──► {brand}-{hook}-{date}.mp4
//! ```
//!
//! The [`export::Exporter`] owns the job lifecycle, progress reporting and
//! teardown of every acquired resource.

pub mod audio;
pub mod bundle;
pub mod cancel;
pub mod compositor;
pub mod delivery;
pub mod encoder;
pub mod export;
pub mod ffmpeg;
pub mod frame_source;
pub mod naming;

pub use cancel::CancelFlag;
pub use export::*;
