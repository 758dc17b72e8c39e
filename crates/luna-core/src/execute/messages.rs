//! Values exchanged between the execution manager, its workers and listeners.

use luna_kernel::PlotStyle;

/// A request to run one cell's code on its notebook's worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub notebook_id: String,
    pub cell_id: String,
    pub code: String,
    /// Count to report; the worker assigns its own when `None`.
    pub execution_count: Option<i64>,
    /// Style overrides applied while rendering this request's figures.
    pub plot_style: Option<PlotStyle>,
}

impl ExecutionRequest {
    pub fn new(
        notebook_id: impl Into<String>,
        cell_id: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            notebook_id: notebook_id.into(),
            cell_id: cell_id.into(),
            code: code.into(),
            execution_count: None,
            plot_style: None,
        }
    }

    pub fn with_execution_count(mut self, count: i64) -> Self {
        self.execution_count = Some(count);
        self
    }

    pub fn with_plot_style(mut self, style: PlotStyle) -> Self {
        self.plot_style = Some(style);
        self
    }
}

/// What a request produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub notebook_id: String,
    pub cell_id: String,
    pub execution_count: i64,
    pub stdout: String,
    pub stderr: String,
    /// Formatted error trace; `Some` means the run failed.
    pub error: Option<String>,
    /// Short error name such as `NameError`, set alongside `error`.
    pub error_name: Option<String>,
    /// Rendered figures, PNG-encoded, in creation order.
    pub images: Vec<Vec<u8>>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.error.as_deref().is_none_or(str::is_empty)
    }
}

/// Progress notifications emitted from worker threads.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Started(ExecutionRequest),
    Finished(ExecutionResult),
    Failed(ExecutionResult),
}

impl ExecutionEvent {
    pub fn notebook_id(&self) -> &str {
        match self {
            Self::Started(request) => &request.notebook_id,
            Self::Finished(result) | Self::Failed(result) => &result.notebook_id,
        }
    }

    pub fn cell_id(&self) -> &str {
        match self {
            Self::Started(request) => &request.cell_id,
            Self::Finished(result) | Self::Failed(result) => &result.cell_id,
        }
    }

    /// The result carried by `Finished` or `Failed`.
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Started(_) => None,
            Self::Finished(result) | Self::Failed(result) => Some(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_empty_error() {
        let mut result = ExecutionResult::default();
        assert!(result.success());

        result.error = Some(String::new());
        assert!(result.success());

        result.error = Some("NameError: undefined variable `x`".into());
        assert!(!result.success());
    }
}
