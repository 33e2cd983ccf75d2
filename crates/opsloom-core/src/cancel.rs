//! Cooperative cancellation flag shared by the stream reader and the
//! conversation controller.
//!
//! Raising the signal never aborts a network call. A stream loop checks the
//! flag once per chunk and stops reading when it is set. Only the owner of the
//! live turn lowers it again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A process-wide abort flag.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Create a new, lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the active stream loop to stop at its next chunk boundary.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Lower the flag (a new send begins, or the live turn ended).
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
