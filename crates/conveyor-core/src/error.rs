//! Error types shared by the core contract types.

use thiserror::Error;

use crate::progress::UnitStatus;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building or validating core contract values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("unit '{unit}' cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        unit: String,
        from: UnitStatus,
        to: UnitStatus,
    },

    #[error("unit '{0}' not recorded: progress is frozen")]
    ProgressFrozen(String),

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("invalid config: {0}")]
    Config(String),
}
