//! Tagged state carried from one chain link to the next.

use conveyor_core::UnitProgressLog;
use serde::{Deserialize, Serialize};

/// Resolved environment for the next link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub account: String,
    pub environment: String,
    pub infrastructure: serde_json::Value,
    #[serde(default)]
    pub unit_progress: UnitProgressLog,
}

/// A lookup failed before any remote work could be dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub message: String,
    #[serde(default)]
    pub unit_progress: UnitProgressLog,
}

/// An unexpected error surfaced during the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionContext {
    pub message: String,
    #[serde(default)]
    pub unit_progress: UnitProgressLog,
}

/// Exactly one variant is populated at a time; the orchestrator finalizes
/// by matching on the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PassThroughData<S> {
    ExecutionContext(ExecutionContext),
    FetchFailure(FetchFailure),
    ExceptionContext(ExceptionContext),
    StepSpecific(S),
}

impl<S> PassThroughData<S> {
    pub fn fetch_failure(message: impl Into<String>) -> Self {
        PassThroughData::FetchFailure(FetchFailure {
            message: message.into(),
            unit_progress: UnitProgressLog::new(),
        })
    }

    pub fn exception(message: impl Into<String>, unit_progress: UnitProgressLog) -> Self {
        PassThroughData::ExceptionContext(ExceptionContext {
            message: message.into(),
            unit_progress,
        })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            PassThroughData::ExecutionContext(_) => "execution_context",
            PassThroughData::FetchFailure(_) => "fetch_failure",
            PassThroughData::ExceptionContext(_) => "exception_context",
            PassThroughData::StepSpecific(_) => "step_specific",
        }
    }

    /// Unit progress carried by the shared variants.
    pub fn unit_progress(&self) -> Option<&UnitProgressLog> {
        match self {
            PassThroughData::ExecutionContext(c) => Some(&c.unit_progress),
            PassThroughData::FetchFailure(f) => Some(&f.unit_progress),
            PassThroughData::ExceptionContext(e) => Some(&e.unit_progress),
            PassThroughData::StepSpecific(_) => None,
        }
    }

    pub fn specific(&self) -> Option<&S> {
        match self {
            PassThroughData::StepSpecific(s) => Some(s),
            _ => None,
        }
    }
}
