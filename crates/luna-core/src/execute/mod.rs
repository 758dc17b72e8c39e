//! Background execution of code cells.
//!
//! [`ExecutionManager`] keeps at most one worker thread per notebook. Each
//! worker owns a persistent kernel namespace and processes its queue in FIFO
//! order, reporting `started`, `finished` and `failed` events from its own
//! thread.

mod config;
mod manager;
mod messages;
mod outputs;
mod worker;

pub use config::{DEFAULT_POLL_INTERVAL, DEFAULT_SHUTDOWN_GRACE, ExecutionConfig, WORKER_STACK_SIZE};
pub use manager::ExecutionManager;
pub use messages::{ExecutionEvent, ExecutionRequest, ExecutionResult};
pub use outputs::{PNG_MIME, decode_image, image_output, outputs_from_result};
