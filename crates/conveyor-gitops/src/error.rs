//! Errors reported by a pull request provider.

use thiserror::Error;

pub type GitResult<T> = Result<T, GitError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GitError {
    #[error("{0}")]
    NotFound(String),

    /// The change cannot be applied as requested (already merged, no diff).
    #[error("{0}")]
    Conflict(String),

    #[error("git provider error: {0}")]
    Api(String),
}
