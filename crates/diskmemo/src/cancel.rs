//! Cooperative cancellation for in-flight computations

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag signalling that the host wants the current computation to stop.
///
/// The cache checks the token before running a computation, between entries
/// of a sequence payload, and right before commit. When it is set the pending
/// instance is rolled back and [`crate::Error::Cancelled`] is returned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an untriggered token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the token can be reused.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Trip this token on Ctrl-C.
    ///
    /// Only one Ctrl-C handler can exist per process.
    #[cfg(feature = "ctrlc")]
    pub fn cancel_on_ctrlc(&self) -> crate::Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || token.cancel()).map_err(|e| {
            crate::Error::configuration(format!("Failed to install Ctrl-C handler: {e}"))
        })
    }
}
