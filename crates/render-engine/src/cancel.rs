//! Cooperative cancellation for export jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use slidereel_common::error::{SlidereelError, SlidereelResult};

/// Shared abort signal checked at every suspension point of a job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> SlidereelResult<()> {
        if self.is_cancelled() {
            Err(SlidereelError::Cancelled)
        } else {
            Ok(())
        }
    }
}
