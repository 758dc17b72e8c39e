//! Per-notebook worker orchestration.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

use luna_kernel::PlotStyle;
use rustc_hash::FxHashMap;

use super::config::ExecutionConfig;
use super::messages::{ExecutionEvent, ExecutionRequest};
use super::worker::{ExecutionSink, Worker};
use crate::error::Result;
use crate::events::ExecutionEvents;

/// Runs code cells on one lazily-created background worker per notebook.
///
/// Requests for the same notebook run strictly in submission order; different
/// notebooks run in parallel. Results are reported through [`Self::events`]
/// and [`Self::subscribe`] on the worker threads.
pub struct ExecutionManager {
    config: ExecutionConfig,
    workers: Mutex<FxHashMap<String, Worker>>,
    sink: Arc<ExecutionSink>,
    plot_style: Mutex<Option<PlotStyle>>,
}

impl ExecutionManager {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(FxHashMap::default()),
            sink: Arc::new(ExecutionSink::default()),
            plot_style: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// `started`, `finished` and `failed` hooks.
    pub fn events(&self) -> &ExecutionEvents {
        &self.sink.events
    }

    /// A channel receiving every later execution event, for consumers that
    /// must process results on their own thread.
    pub fn subscribe(&self) -> Receiver<ExecutionEvent> {
        self.sink.subscribe()
    }

    /// Style overrides attached to requests submitted from now on.
    pub fn set_plot_style(&self, style: Option<PlotStyle>) {
        *self.plot_style.lock().unwrap_or_else(PoisonError::into_inner) =
            style.filter(|s| !s.is_empty());
    }

    /// Queue `code` for execution on the notebook's worker, starting the
    /// worker if there is none. Returns as soon as the request is queued.
    pub fn run_cell(
        &self,
        notebook_id: &str,
        cell_id: &str,
        code: &str,
        execution_count: Option<i64>,
    ) -> Result<()> {
        let mut request = ExecutionRequest::new(notebook_id, cell_id, code);
        request.execution_count = execution_count;
        self.submit(request)
    }

    /// Queue a prepared request. A request without a plot style picks up the
    /// one set through [`Self::set_plot_style`].
    pub fn submit(&self, mut request: ExecutionRequest) -> Result<()> {
        if request.plot_style.is_none() {
            request.plot_style = self
                .plot_style
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = workers.get(&request.notebook_id) {
            match worker.enqueue(request.clone()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("{}; starting a new worker", e);
                    workers.remove(&request.notebook_id);
                }
            }
        }

        let worker = Worker::spawn(&request.notebook_id, &self.config, Arc::clone(&self.sink))?;
        let notebook_id = request.notebook_id.clone();
        worker.enqueue(request)?;
        workers.insert(notebook_id, worker);
        Ok(())
    }

    /// Stop every worker.
    pub fn shutdown(&self) {
        let drained: Vec<Worker> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, worker)| worker)
            .collect();

        for worker in &drained {
            worker.request_stop();
        }
        for worker in drained {
            worker.shutdown(self.config.shutdown_grace);
        }
    }

    /// Stop and discard one notebook's worker. Returns whether one existed.
    ///
    /// Safe to call from an execution event listener; the worker's own thread
    /// is never waited on.
    pub fn shutdown_notebook(&self, notebook_id: &str) -> bool {
        let worker = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(notebook_id);

        match worker {
            Some(worker) => {
                worker.shutdown(self.config.shutdown_grace);
                true
            }
            None => false,
        }
    }

    /// Abandon the notebook's current work and restart its worker with an
    /// empty namespace.
    ///
    /// The in-flight request, if any, is aborted and reported as failed.
    /// Queued requests that had not started are dropped, not replayed.
    /// Returns `false` without starting anything when the notebook had no
    /// worker.
    pub fn interrupt_notebook(&self, notebook_id: &str) -> bool {
        let old = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(old) = workers.remove(notebook_id) else {
                return false;
            };
            old.request_stop();

            match Worker::spawn(notebook_id, &self.config, Arc::clone(&self.sink)) {
                Ok(replacement) => {
                    workers.insert(notebook_id.to_string(), replacement);
                }
                Err(e) => {
                    tracing::warn!("Failed to restart worker for {}: {}", notebook_id, e);
                }
            }
            old
        };

        old.shutdown(self.config.shutdown_grace);
        tracing::info!("Interrupted notebook {}", notebook_id);
        true
    }

    pub fn has_worker(&self, notebook_id: &str) -> bool {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(notebook_id)
    }

    /// Ids of notebooks with a live worker, sorted.
    pub fn active_notebooks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl Default for ExecutionManager {
    fn default() -> Self {
        Self::new(ExecutionConfig::default())
    }
}

impl Drop for ExecutionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("config", &self.config)
            .field("workers", &self.active_notebooks())
            .finish()
    }
}
