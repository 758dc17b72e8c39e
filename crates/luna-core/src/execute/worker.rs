//! One background thread per notebook, running requests in FIFO order.
//!
//! The worker owns a [`Kernel`] for its whole lifetime, so definitions made
//! by one request are visible to the next. Shutting the worker down drops the
//! kernel and with it the namespace.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use luna_kernel::{AbortHandle, Kernel, KernelError};

use super::config::ExecutionConfig;
use super::messages::{ExecutionEvent, ExecutionRequest, ExecutionResult};
use crate::error::{Error, Result};
use crate::events::ExecutionEvents;

/// Fan-out point for worker notifications: the event hooks plus any channel
/// subscribers.
#[derive(Debug, Default)]
pub(crate) struct ExecutionSink {
    pub(crate) events: ExecutionEvents,
    subscribers: Mutex<Vec<Sender<ExecutionEvent>>>,
}

impl ExecutionSink {
    pub(crate) fn subscribe(&self) -> Receiver<ExecutionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn publish(&self, event: ExecutionEvent) {
        match &event {
            ExecutionEvent::Started(request) => self.events.started.emit(request),
            ExecutionEvent::Finished(result) => self.events.finished.emit(result),
            ExecutionEvent::Failed(result) => self.events.failed.emit(result),
        }

        // Receivers that were dropped are pruned here.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

enum WorkerMessage {
    Run(Box<ExecutionRequest>),
    Stop,
}

/// Sends on drop, so the manager learns about the exit even if the thread
/// unwinds.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Handle to a running worker thread.
pub(crate) struct Worker {
    notebook_id: String,
    queue: Sender<WorkerMessage>,
    stop: Arc<AtomicBool>,
    abort: AbortHandle,
    exited: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread for `notebook_id`.
    pub(crate) fn spawn(
        notebook_id: &str,
        config: &ExecutionConfig,
        sink: Arc<ExecutionSink>,
    ) -> Result<Self> {
        let (queue, requests) = mpsc::channel();
        let (exit_tx, exited) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let abort = AbortHandle::new();

        let worker_loop = WorkerLoop {
            notebook_id: notebook_id.to_string(),
            requests,
            stop: Arc::clone(&stop),
            abort: abort.clone(),
            poll_interval: config.poll_interval,
            sink,
        };

        let handle = thread::Builder::new()
            .name(format!("luna-exec-{}", notebook_id))
            .stack_size(config.stack_size)
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                worker_loop.run();
            })
            .map_err(|e| Error::Worker(format!("failed to spawn worker: {}", e)))?;

        tracing::info!("Started execution worker for notebook {}", notebook_id);

        Ok(Self {
            notebook_id: notebook_id.to_string(),
            queue,
            stop,
            abort,
            exited,
            handle: Some(handle),
        })
    }

    /// Queue a request. Fails if the thread is gone.
    pub(crate) fn enqueue(&self, request: ExecutionRequest) -> Result<()> {
        self.queue
            .send(WorkerMessage::Run(Box::new(request)))
            .map_err(|_| Error::Worker(format!("worker for {} has exited", self.notebook_id)))
    }

    /// Ask the thread to stop without waiting. Queued requests are dropped
    /// and the in-flight one is aborted at its next check point.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.abort.abort();
        let _ = self.queue.send(WorkerMessage::Stop);
    }

    fn is_current_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    /// Stop the thread and wait up to `grace` for it to exit. A worker that
    /// does not exit in time is detached.
    ///
    /// Called from the worker's own thread (an event listener stopping its
    /// notebook), the thread is detached at once and exits when the listener
    /// returns.
    pub(crate) fn shutdown(mut self, grace: Duration) -> bool {
        self.request_stop();

        if self.is_current_thread() {
            tracing::debug!("Execution worker for {} is stopping itself", self.notebook_id);
            self.handle.take();
            return true;
        }

        match self.exited.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take()
                    && handle.join().is_err()
                {
                    tracing::error!("Execution worker for {} panicked", self.notebook_id);
                }
                tracing::info!("Stopped execution worker for notebook {}", self.notebook_id);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Execution worker for {} did not stop within {:?}; detaching",
                    self.notebook_id,
                    grace
                );
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
        }
    }
}

/// State moved into the worker thread.
struct WorkerLoop {
    notebook_id: String,
    requests: Receiver<WorkerMessage>,
    stop: Arc<AtomicBool>,
    abort: AbortHandle,
    poll_interval: Duration,
    sink: Arc<ExecutionSink>,
}

impl WorkerLoop {
    fn run(self) {
        // The kernel is not Send; it is built here and never leaves the thread.
        let mut kernel = Kernel::with_abort(self.abort.clone());
        let mut counter: i64 = 0;

        loop {
            if self.stopping() {
                break;
            }
            match self.requests.recv_timeout(self.poll_interval) {
                Ok(WorkerMessage::Run(request)) => {
                    if self.stopping() {
                        break;
                    }
                    let count = match request.execution_count {
                        Some(count) => {
                            counter = counter.max(count);
                            count
                        }
                        None => {
                            counter += 1;
                            counter
                        }
                    };
                    self.execute(&mut kernel, *request, count);
                }
                Ok(WorkerMessage::Stop) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::debug!("Execution loop for {} exited", self.notebook_id);
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn execute(&self, kernel: &mut Kernel, request: ExecutionRequest, execution_count: i64) {
        tracing::debug!(
            "Executing cell {} in notebook {} [{}]",
            request.cell_id,
            request.notebook_id,
            execution_count
        );
        self.sink.publish(ExecutionEvent::Started(request.clone()));

        let mut result = ExecutionResult {
            notebook_id: request.notebook_id.clone(),
            cell_id: request.cell_id.clone(),
            execution_count,
            ..Default::default()
        };

        let style = request.plot_style.clone().unwrap_or_default();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let output = kernel.run(&request.code);
            let images = kernel.take_figures(&style);
            (output, images)
        }));

        match outcome {
            Ok((output, images)) => {
                result.stdout = output.stdout;
                result.stderr = output.stderr;
                result.images = images;
                if let Some(error) = output.error {
                    result.error_name = Some(error.ename().to_string());
                    result.error = Some(error.trace());
                }
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Worker for {} panicked: {}", self.notebook_id, message);
                let error = KernelError::Panic(message);
                result.error_name = Some(error.ename().to_string());
                result.error = Some(error.trace());
            }
        }

        if result.success() {
            self.sink.publish(ExecutionEvent::Finished(result));
        } else {
            self.sink.publish(ExecutionEvent::Failed(result));
        }
    }
}
