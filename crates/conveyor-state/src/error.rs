//! Error types for the sweeping output store.

use thiserror::Error;

/// Result type alias for output store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during output store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("output already published: {0}")]
    AlreadyPublished(String),

    #[error("lock poisoned: {0}")]
    Poisoned(String),
}
