//! Execution subsystem configuration.

use std::time::Duration;

/// Default interval at which an idle worker checks its stop flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time `shutdown` waits for a worker to exit.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Stack size for worker threads. Script recursion runs on the native stack.
pub const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Tuning for [`ExecutionManager`](super::ExecutionManager).
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// How long an idle worker blocks on its queue before re-checking for
    /// shutdown.
    pub poll_interval: Duration,

    /// How long shutting a worker down waits before detaching it.
    pub shutdown_grace: Duration,

    /// Stack size of each worker thread, in bytes.
    pub stack_size: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stack_size: WORKER_STACK_SIZE,
        }
    }
}

impl ExecutionConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
