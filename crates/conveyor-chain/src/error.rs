//! Error types for step families and the orchestrator protocol.

use conveyor_core::{CoreError, RequestId};
use conveyor_state::StateError;
use thiserror::Error;

/// Result type alias for step family callbacks.
pub type StepResult<T> = Result<T, StepError>;

/// Errors a step family may return from a chain link.
#[derive(Debug, Error)]
pub enum StepError {
    /// A required entity is missing. User-facing, not retryable.
    #[error("{0}")]
    NotFound(String),

    /// Malformed input (a duration, a port, a payload shape).
    #[error("{0}")]
    InvalidFormat(String),

    #[error("output store error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Unexpected(String),
}

impl StepError {
    /// Whether the failure should be reported as correctable user input.
    pub fn is_user_input(&self) -> bool {
        matches!(self, StepError::NotFound(_) | StepError::InvalidFormat(_))
    }
}

impl From<CoreError> for StepError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidDuration { .. } | CoreError::Config(_) => {
                StepError::InvalidFormat(e.to_string())
            }
            other => StepError::Unexpected(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::InvalidFormat(e.to_string())
    }
}

/// A response the orchestrator refused to act on.
///
/// These are logged and dropped; they never reach a step family.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("response {0} arrived after the chain finalized")]
    ChainFinalized(RequestId),

    #[error("duplicate response for {0}")]
    Duplicate(RequestId),

    #[error("response {0} does not match the outstanding request")]
    UnknownRequest(RequestId),
}
