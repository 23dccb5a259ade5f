//! The step family trait: the only extension point of the orchestrator.

use std::fmt;

use conveyor_core::{
    RemoteTaskResponse, RequestId, StepResponse, TaskError, TaskException, TaskResult, TaskSpec, UnitProgress,
    UnitProgressLog,
};

use crate::context::StepContext;
use crate::error::StepResult;
use crate::pass_through::PassThroughData;

/// What a chain link wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainDecision<S> {
    /// Send one more remote task. `chain_end` declares this the last link.
    Dispatch {
        task: TaskSpec,
        pass_through: PassThroughData<S>,
        chain_end: bool,
    },
    /// Stop; the orchestrator builds the response from the variant tag.
    Finalize(PassThroughData<S>),
    /// Stop with a response the family built itself.
    Complete(StepResponse),
}

impl<S> ChainDecision<S> {
    pub fn dispatch(task: TaskSpec, pass_through: PassThroughData<S>) -> Self {
        ChainDecision::Dispatch {
            task,
            pass_through,
            chain_end: false,
        }
    }

    pub fn dispatch_last(task: TaskSpec, pass_through: PassThroughData<S>) -> Self {
        ChainDecision::Dispatch {
            task,
            pass_through,
            chain_end: true,
        }
    }
}

/// The worker's answer as a link sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkAnswer<'r> {
    Success(&'r serde_json::Value),
    Failure(&'r TaskError),
}

/// A response handed to [`StepFamily::continue_or_finalize`].
///
/// Exceptions never reach a link: the orchestrator finalizes on them first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkResponse<'r> {
    pub request_id: &'r RequestId,
    pub answer: LinkAnswer<'r>,
    pub unit_progress: &'r [UnitProgress],
}

impl<'r> LinkResponse<'r> {
    /// Split a worker response into a link view or its exception.
    pub fn split(response: &'r RemoteTaskResponse) -> Result<Self, &'r TaskException> {
        let answer = match &response.result {
            TaskResult::Success(value) => LinkAnswer::Success(value),
            TaskResult::Failure(error) => LinkAnswer::Failure(error),
            TaskResult::Exception(exception) => return Err(exception),
        };
        Ok(Self {
            request_id: &response.request_id,
            answer,
            unit_progress: &response.unit_progress,
        })
    }

    /// The unit progress reported with this answer, as an owned log.
    pub fn progress(&self) -> UnitProgressLog {
        UnitProgressLog::from_entries(self.unit_progress.to_vec())
    }
}

/// A kind of step built from one or more remote task round trips.
///
/// Links are pure with respect to orchestrator state: each call receives
/// what the previous link emitted and returns the next decision.
pub trait StepFamily: Send + Sync {
    type Params;
    type Specific: Clone + fmt::Debug + Send;

    fn name(&self) -> &str;

    fn start_link(
        &self,
        ctx: &StepContext,
        params: &Self::Params,
    ) -> StepResult<ChainDecision<Self::Specific>>;

    fn continue_or_finalize(
        &self,
        ctx: &StepContext,
        data: PassThroughData<Self::Specific>,
        response: &LinkResponse<'_>,
        chain_end: bool,
    ) -> StepResult<ChainDecision<Self::Specific>>;

    /// Compensating task for a failed chain, if the family has one.
    fn rollback(
        &self,
        _ctx: &StepContext,
        _data: &PassThroughData<Self::Specific>,
    ) -> Option<TaskSpec> {
        None
    }
}
