//! A persistent execution namespace.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::abort::AbortHandle;
use crate::error::KernelError;
use crate::interp::Interpreter;
use crate::plot::PlotStyle;
use crate::value::Value;

/// What a single run produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<KernelError>,
}

impl RunOutput {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A kernel owns one namespace. Bindings made by one run are visible to
/// the next until [`Kernel::reset`].
///
/// Kernels hold `Rc` values and parsed syntax trees, so they are not `Send`.
/// Create them on the thread that runs them.
pub struct Kernel {
    interp: Interpreter,
    abort: AbortHandle,
}

impl Kernel {
    pub fn new() -> Self {
        Self::with_abort(AbortHandle::new())
    }

    /// Create a kernel that observes an existing abort handle.
    pub fn with_abort(abort: AbortHandle) -> Self {
        Self {
            interp: Interpreter::new(abort.clone()),
            abort,
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Execute `code`, capturing everything it prints.
    ///
    /// Panics inside the evaluator are caught and reported as
    /// [`KernelError::Panic`]; the namespace survives them.
    pub fn run(&mut self, code: &str) -> RunOutput {
        tracing::trace!("Running {} bytes of code", code.len());
        let interp = &mut self.interp;
        let outcome = catch_unwind(AssertUnwindSafe(|| interp.run(code)));

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!("Kernel panicked: {}", message);
                Some(KernelError::Panic(message))
            }
        };

        RunOutput {
            stdout: std::mem::take(&mut self.interp.stdout),
            stderr: std::mem::take(&mut self.interp.stderr),
            error,
        }
    }

    /// Render and drain the figures created since the last call.
    pub fn take_figures(&mut self, style: &PlotStyle) -> Vec<Vec<u8>> {
        self.interp.figures.take_png(style)
    }

    /// Number of figures waiting to be collected.
    pub fn pending_figures(&self) -> usize {
        self.interp.figures.len()
    }

    /// Look up a global binding.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.interp.globals.get(name)
    }

    /// Bind a global, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.interp.globals.insert(name.into(), value);
    }

    /// Names bound in the namespace, sorted.
    pub fn variables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.interp.globals.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every binding and pending figure.
    pub fn reset(&mut self) {
        self.interp.globals.clear();
        self.interp.scopes.clear();
        self.interp.figures.clear();
        self.interp.stdout.clear();
        self.interp.stderr.clear();
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
