//! Error types for luna-kernel.

use std::fmt;

use thiserror::Error;

/// Result type for kernel operations.
pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// A position in cell source (1-indexed line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub(crate) fn from_span(span: proc_macro2::Span) -> Self {
        let start = span.start();
        Self {
            line: start.line,
            column: start.column + 1,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Category of a runtime failure, mirrored into `ename` of error outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unbound variable or function.
    Name,
    /// Operation applied to a value of the wrong type.
    Type,
    /// Right type, unusable value.
    Value,
    /// Index outside a list or string.
    Index,
    /// Division or remainder by zero.
    ZeroDivision,
    /// Integer overflow.
    Overflow,
    /// Failed `assert!`/`assert_eq!`.
    Assertion,
    /// Explicit `panic!`.
    Panic,
    /// Call depth exceeded.
    Recursion,
    /// Syntax that parses but has no meaning in the kernel.
    Unsupported,
}

impl ErrorKind {
    /// Exception-style name used in notebook error outputs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Name => "NameError",
            Self::Type => "TypeError",
            Self::Value => "ValueError",
            Self::Index => "IndexError",
            Self::ZeroDivision => "ZeroDivisionError",
            Self::Overflow => "OverflowError",
            Self::Assertion => "AssertionError",
            Self::Panic => "PanicError",
            Self::Recursion => "RecursionError",
            Self::Unsupported => "UnsupportedError",
        }
    }
}

/// Errors raised while running cell code.
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    /// The cell source could not be parsed.
    #[error("syntax error at {location}: {message}")]
    Syntax { message: String, location: Location },

    /// Evaluation failed.
    #[error("{}: {message}", kind.name())]
    Runtime {
        kind: ErrorKind,
        message: String,
        location: Option<Location>,
        /// Call frames, innermost first.
        frames: Vec<String>,
    },

    /// Execution was aborted through the kernel's abort handle.
    #[error("execution interrupted")]
    Interrupted,

    /// The evaluator panicked.
    #[error("kernel panicked: {0}")]
    Panic(String),
}

impl KernelError {
    pub(crate) fn runtime(kind: ErrorKind, message: impl Into<String>, span: proc_macro2::Span) -> Self {
        Self::Runtime {
            kind,
            message: message.into(),
            location: Some(Location::from_span(span)),
            frames: Vec::new(),
        }
    }

    pub(crate) fn with_frame(mut self, frame: String) -> Self {
        if let Self::Runtime { frames, .. } = &mut self {
            frames.push(frame);
        }
        self
    }

    /// Short exception-style name.
    pub fn ename(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "SyntaxError",
            Self::Runtime { kind, .. } => kind.name(),
            Self::Interrupted => "KeyboardInterrupt",
            Self::Panic(_) => "KernelPanic",
        }
    }

    /// The bare message without location or name.
    pub fn message(&self) -> String {
        match self {
            Self::Syntax { message, .. } | Self::Runtime { message, .. } => message.clone(),
            Self::Interrupted => "execution interrupted".to_string(),
            Self::Panic(message) => message.clone(),
        }
    }

    /// Full multi-line trace, outermost frame first.
    pub fn trace(&self) -> String {
        match self {
            Self::Runtime {
                location, frames, ..
            } => {
                let mut out = String::from("Trace (most recent call last):\n");
                for frame in frames.iter().rev() {
                    out.push_str("  ");
                    out.push_str(frame);
                    out.push('\n');
                }
                if let Some(location) = location {
                    out.push_str(&format!("  at {}\n", location));
                }
                out.push_str(&self.to_string());
                out
            }
            other => other.to_string(),
        }
    }
}
