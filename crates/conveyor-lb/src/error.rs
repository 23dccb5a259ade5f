//! Load-balancer error types.

use thiserror::Error;

/// Result type alias for load-balancer operations.
pub type LbResult<T> = Result<T, LbError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LbError {
    /// A load balancer, listener, rule, action, target group, or compute
    /// group does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A port or timeout that is not a number.
    #[error("{0}")]
    InvalidFormat(String),

    #[error("{what}: gave up after {pages} pages with a continuation token still set")]
    PaginationLimit { what: String, pages: usize },

    /// The provider rejected or failed the call.
    #[error("provider error: {0}")]
    Api(String),
}

impl LbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LbError::NotFound(_))
    }
}
