//! Harness and backend error types.

use thiserror::Error;

/// Result alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Harness errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A backend could not be opened. Fatal for the whole session.
    #[error("connection error: {backend}: {reason}")]
    Connection { backend: String, reason: String },

    /// An operation failed on one iteration. Aborts only this
    /// operation/backend pairing.
    #[error("{backend}: `{operation}` failed on iteration {iteration}: {source}")]
    Operation {
        backend: String,
        operation: String,
        iteration: usize,
        #[source]
        source: BackendError,
    },

    /// Aggregation was asked to summarize zero samples.
    #[error("cannot summarize an empty sample set")]
    EmptyInput,

    /// Invalid benchmark configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors raised by a backend while executing or resetting.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Document store error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Document encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An index-assisted lookup ran without its index.
    #[error("no index on field `{0}`")]
    MissingIndex(&'static str),

    /// The backend does not implement the operation.
    #[error("operation `{0}` is not supported")]
    Unsupported(&'static str),

    /// The handle was already closed.
    #[error("backend handle is closed")]
    Closed,
}

impl Error {
    /// Name of the backend the error is attributed to, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            Error::Connection { backend, .. } | Error::Operation { backend, .. } => Some(backend),
            Error::EmptyInput | Error::Config(_) => None,
        }
    }
}
