//! Error types for annodex.

use thiserror::Error;

/// Result type alias using annodex's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for annodex operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reference snapshot load failed; the run must abort
    #[error("Reference load error: {0}")]
    ReferenceLoad(String),

    /// Bulk ingestion of a tagger hit file failed
    #[error("Bulk load error: {0}")]
    BulkLoad(String),

    /// A stage-transition or rollup operation failed
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// A transient connectivity failure persisted past the retry budget
    #[error("Transient failure exhausted retry for {operation}: {source}")]
    TransientExhausted {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
