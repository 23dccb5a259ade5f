//! Gateway error types.

use conveyor_core::RequestId;
use thiserror::Error;

/// Errors that can occur while submitting or routing remote tasks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("submission queue is full, request {0} rejected")]
    QueueFull(RequestId),

    #[error("worker pool is closed")]
    Closed,

    #[error("no handler registered for task type {0}")]
    NoHandler(String),

    #[error("task type {task_type} requires tags {required:?}, pool advertises {advertised:?}")]
    SelectorMismatch {
        task_type: String,
        required: Vec<String>,
        advertised: Vec<String>,
    },

    #[error("request {0} is already awaiting a response")]
    AlreadyRegistered(RequestId),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
