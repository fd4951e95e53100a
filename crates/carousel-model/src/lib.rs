//! SlideReel Carousel Model
//!
//! Defines the data contracts the export pipeline consumes:
//! - **Slides:** One generated still image plus its generation status
//! - **Export requests:** The ordered slides, optional music, brand context
//!   and the output aspect preset for one export job
//! - **Manifests:** A carousel described on disk as JSON
//!
//! The model is owned by the surrounding creation flow; the render engine
//! only reads it.

pub mod aspect;
pub mod manifest;
pub mod request;
pub mod slide;

pub use aspect::*;
pub use manifest::*;
pub use request::*;
pub use slide::*;
