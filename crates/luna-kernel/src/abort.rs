//! Cooperative cancellation for running cells.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle for cooperative cancellation of cell execution.
///
/// `AbortHandle` provides a thread-safe mechanism for signaling that execution
/// should stop. It can be cloned and shared across threads; any clone can
/// trigger the abort and all other clones observe it.
///
/// The interpreter polls the handle before every statement, loop iteration
/// and function call, so even a tight `loop {}` unwinds promptly.
///
/// # Example
///
/// ```
/// use luna_kernel::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let worker_side = handle.clone();
///
/// assert!(!worker_side.is_aborted());
/// handle.abort();
/// assert!(worker_side.is_aborted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a new, un-aborted handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Request abort of execution.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}
