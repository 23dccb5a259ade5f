//! Terminal result of a step, handed back to the pipeline engine.

use serde::{Deserialize, Serialize};

use crate::progress::{UnitProgress, UnitProgressLog, UnitStatus, now_millis};
use crate::task::{ExceptionKind, TaskError, TaskErrorKind, TaskException};

/// Error code attached to failures synthesized from exceptions.
pub const GENERAL_ERROR: &str = "GENERAL_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureType {
    /// Generic tag for unexpected exceptions.
    Application,
    /// Missing entities, malformed input.
    UserInput,
    Timeout,
    Cancelled,
}

/// Structured failure details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub failure_types: Vec<FailureType>,
    pub code: String,
    pub message: String,
}

impl FailureInfo {
    /// Failure synthesized from an unexpected exception.
    pub fn application(message: impl Into<String>) -> Self {
        Self {
            failure_types: vec![FailureType::Application],
            code: GENERAL_ERROR.to_string(),
            message: message.into(),
        }
    }

    /// Failure the user can fix (missing entity, bad input).
    pub fn user_input(message: impl Into<String>) -> Self {
        Self {
            failure_types: vec![FailureType::UserInput],
            code: "INVALID_REQUEST".to_string(),
            message: message.into(),
        }
    }

    /// Failure synthesized from a worker or gateway exception.
    pub fn exception(exception: &TaskException) -> Self {
        let failure_type = match exception.kind {
            ExceptionKind::Unexpected => FailureType::Application,
            ExceptionKind::TimedOut => FailureType::Timeout,
            ExceptionKind::Cancelled => FailureType::Cancelled,
        };
        Self {
            failure_types: vec![failure_type],
            code: GENERAL_ERROR.to_string(),
            message: exception.message.clone(),
        }
    }

    /// Failure a worker reported; the message is kept verbatim.
    pub fn worker(error: &TaskError) -> Self {
        match error.kind {
            TaskErrorKind::NotFound | TaskErrorKind::InvalidFormat => Self::user_input(&error.message),
            TaskErrorKind::Command => Self::application(&error.message),
        }
    }
}

/// A named artifact attached to the step response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub value: serde_json::Value,
}

impl StepOutcome {
    pub fn new(name: &str, value: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

/// The single terminal result of a chain.
///
/// The unit progress list never contains a non-terminal status: both
/// constructors settle dangling units before freezing the list, to
/// `Success` for a succeeded step and to `Failure` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    status: StepStatus,
    unit_progress: Vec<UnitProgress>,
    outcomes: Vec<StepOutcome>,
    failure: Option<FailureInfo>,
}

impl StepResponse {
    pub fn succeeded(progress: UnitProgressLog, outcomes: Vec<StepOutcome>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            unit_progress: closed(progress, StepStatus::Succeeded, None),
            outcomes,
            failure: None,
        }
    }

    pub fn failed(progress: UnitProgressLog, failure: FailureInfo) -> Self {
        let note = failure.message.clone();
        Self {
            status: StepStatus::Failed,
            unit_progress: closed(progress, StepStatus::Failed, Some(&note)),
            outcomes: Vec::new(),
            failure: Some(failure),
        }
    }

    /// Lay this response's unit progress over `prior`, the log accumulated
    /// by earlier links. Units this response reports win.
    pub fn with_prior_progress(mut self, prior: UnitProgressLog) -> Self {
        let mut log = prior;
        log.merge(&self.unit_progress);
        let note = self.failure.as_ref().map(|f| f.message.clone());
        self.unit_progress = closed(log, self.status, note.as_deref());
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    pub fn unit_progress(&self) -> &[UnitProgress] {
        &self.unit_progress
    }

    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn failure(&self) -> Option<&FailureInfo> {
        self.failure.as_ref()
    }
}

fn closed(mut progress: UnitProgressLog, status: StepStatus, note: Option<&str>) -> Vec<UnitProgress> {
    let to = match status {
        StepStatus::Succeeded => UnitStatus::Success,
        StepStatus::Failed => UnitStatus::Failure,
    };
    progress.settle_dangling(now_millis(), to, note);
    progress.into_entries()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_response_closes_running_units() {
        let mut log = UnitProgressLog::with_units(["A", "B"]);
        log.start("A").unwrap();

        let resp = StepResponse::failed(log, FailureInfo::application("boom"));
        assert_eq!(resp.status(), StepStatus::Failed);
        assert!(resp.unit_progress().iter().all(|u| u.status == UnitStatus::Failure));
        assert_eq!(resp.failure().unwrap().code, GENERAL_ERROR);
        assert!(resp.outcomes().is_empty());
    }

    #[test]
    fn prior_progress_is_kept_under_later_units() {
        let mut prior = UnitProgressLog::with_units(["Fetch", "Apply"]);
        prior.succeed("Fetch", None).unwrap();
        prior.start("Apply").unwrap();

        let mut last = UnitProgressLog::new();
        last.start("Apply").unwrap();
        last.succeed("Apply", Some("done")).unwrap();

        let resp = StepResponse::succeeded(last, vec![]).with_prior_progress(prior);
        let names: Vec<_> = resp.unit_progress().iter().map(|u| u.unit_name.as_str()).collect();
        assert_eq!(names, ["Fetch", "Apply"]);
        assert!(resp.unit_progress().iter().all(|u| u.status == UnitStatus::Success));
    }

    #[test]
    fn succeeded_response_keeps_outcomes() {
        let mut log = UnitProgressLog::with_units(["A"]);
        log.succeed("A", None).unwrap();

        let resp = StepResponse::succeeded(
            log,
            vec![StepOutcome::new("output", serde_json::json!({"k": 1}))],
        );
        assert!(resp.is_success());
        assert_eq!(resp.outcome("output").unwrap().value["k"], 1);
        assert!(resp.failure().is_none());
    }

    #[test]
    fn succeeded_response_settles_dangling_units_to_success() {
        let mut log = UnitProgressLog::with_units(["A", "B"]);
        log.succeed("A", None).unwrap();
        log.start("B").unwrap();

        let resp = StepResponse::succeeded(log, vec![]);
        assert!(resp.unit_progress().iter().all(|u| u.status == UnitStatus::Success));
        assert!(resp.unit_progress().iter().all(|u| u.ended_at.is_some()));
    }

    #[test]
    fn exception_kinds_map_to_failure_types() {
        let timed_out = FailureInfo::exception(&TaskException::new(ExceptionKind::TimedOut, "late"));
        assert_eq!(timed_out.failure_types, vec![FailureType::Timeout]);
        assert_eq!(timed_out.code, GENERAL_ERROR);
        assert_eq!(timed_out.message, "late");

        let cancelled = FailureInfo::exception(&TaskException::new(ExceptionKind::Cancelled, "stop"));
        assert_eq!(cancelled.failure_types, vec![FailureType::Cancelled]);

        let not_found = FailureInfo::worker(&TaskError::new(TaskErrorKind::NotFound, "no such group"));
        assert_eq!(not_found.failure_types, vec![FailureType::UserInput]);
    }
}
