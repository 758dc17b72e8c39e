//! Error types for luna-core.

use thiserror::Error;

/// Result type for luna-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in luna-core.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value could not be turned into a document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A document could not be turned into a value.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The document has no usable id field.
    #[error("document has no `{0}` field")]
    MissingId(&'static str),

    /// The id cannot be used as a file name.
    #[error("invalid document id: {0:?}")]
    InvalidId(String),

    /// Atomic write failed; the previous document is untouched.
    #[error("failed to persist {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A timestamp could not be parsed.
    #[error("invalid timestamp: {0:?}")]
    Timestamp(String),

    /// No usable data directory.
    #[error("configuration error: {0}")]
    Config(String),

    /// An execution worker could not be started or reached.
    #[error("worker error: {0}")]
    Worker(String),
}
