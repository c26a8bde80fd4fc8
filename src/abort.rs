//! Cooperative cancellation for long walks and scans.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abort flag.
///
/// Clones observe the same flag, so a handle can be given to another
/// thread (a Ctrl-C handler, a UI) while the reader runs.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current operation stops at its next step
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_signalled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the handle can be reused
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
