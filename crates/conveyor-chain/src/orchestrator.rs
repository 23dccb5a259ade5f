//! Orchestrator: drives one step through its chain of remote tasks.
//!
//! `start` runs the first link and either suspends on a request or
//! finishes immediately. Each `resume` feeds one response back, and
//! the chain either suspends again or finalizes. Nothing here blocks; the
//! async driver lives in `conveyor-gateway`.
//!
//! A chain produces exactly one terminal `StepResponse`. After that,
//! every response is discarded as a protocol error.

use std::collections::HashSet;

use conveyor_core::{
    FailureInfo, RemoteTaskRequest, RemoteTaskResponse, RequestId, StepResponse, StepStatus, UnitProgressLog,
};
use tracing::{debug, info, warn};

use crate::context::StepContext;
use crate::error::{ProtocolError, StepError, StepResult};
use crate::family::{ChainDecision, LinkResponse, StepFamily};
use crate::pass_through::PassThroughData;

const NO_TERMINAL_OUTCOME: &str = "step finalized without a terminal outcome";

/// Result of starting a chain.
#[derive(Debug)]
pub enum Started<S> {
    Suspended(RemoteTaskRequest, ChainState<S>),
    Terminal(StepResponse),
}

/// Result of feeding one response into a suspended chain.
#[derive(Debug)]
pub enum Resumption {
    Suspended(RemoteTaskRequest),
    Terminal(StepResponse),
    /// The response was ignored. No state changed.
    Discarded(ProtocolError),
}

enum Next {
    Suspended(RemoteTaskRequest),
    Terminal(StepResponse),
}

/// Per-chain bookkeeping, owned exclusively by one chain.
#[derive(Debug)]
pub struct ChainState<S> {
    step: String,
    ctx: StepContext,
    pass_through: Option<PassThroughData<S>>,
    chain_ended: bool,
    outstanding: Option<RequestId>,
    resolved: HashSet<RequestId>,
    progress: UnitProgressLog,
    finalized: Option<StepStatus>,
    links: u32,
}

impl<S> ChainState<S> {
    fn new(step: &str, ctx: StepContext) -> Self {
        Self {
            step: step.to_string(),
            ctx,
            pass_through: None,
            chain_ended: false,
            outstanding: None,
            resolved: HashSet::new(),
            progress: UnitProgressLog::new(),
            finalized: None,
            links: 0,
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    pub fn outstanding(&self) -> Option<&RequestId> {
        self.outstanding.as_ref()
    }

    /// Number of requests dispatched so far.
    pub fn links(&self) -> u32 {
        self.links
    }

    pub fn chain_ended(&self) -> bool {
        self.chain_ended
    }

    pub fn progress(&self) -> &UnitProgressLog {
        &self.progress
    }

    /// Pass-through emitted by the most recent link.
    pub fn pass_through(&self) -> Option<&PassThroughData<S>> {
        self.pass_through.as_ref()
    }

    pub fn finalized(&self) -> Option<StepStatus> {
        self.finalized
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }
}

/// Runs chains for one step family.
pub struct Orchestrator<F> {
    family: F,
}

impl<F: StepFamily> Orchestrator<F> {
    pub fn new(family: F) -> Self {
        Self { family }
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    /// Run the first link.
    pub fn start(&self, ctx: StepContext, params: &F::Params) -> Started<F::Specific> {
        let mut state = ChainState::new(self.family.name(), ctx);
        info!(
            step = %state.step,
            execution_id = %state.ctx.scope.execution_id,
            "chain started"
        );
        let decision = self.family.start_link(&state.ctx, params);
        match self.apply(&mut state, decision) {
            Next::Suspended(request) => Started::Suspended(request, state),
            Next::Terminal(response) => Started::Terminal(response),
        }
    }

    /// Feed one worker response into the chain.
    pub fn resume(&self, state: &mut ChainState<F::Specific>, response: RemoteTaskResponse) -> Resumption {
        if let Err(protocol) = Self::check_response(state, &response.request_id) {
            warn!(step = %state.step, error = %protocol, "discarding response");
            return Resumption::Discarded(protocol);
        }

        state.outstanding = None;
        state.resolved.insert(response.request_id.clone());
        state.progress.merge(&response.unit_progress);
        debug!(
            step = %state.step,
            request_id = %response.request_id,
            "response accepted"
        );

        let next = match LinkResponse::split(&response) {
            Err(exception) => {
                let failed = StepResponse::failed(state.progress.clone(), FailureInfo::exception(exception));
                Next::Terminal(self.finish(state, failed))
            }
            Ok(link) => match state.pass_through.clone() {
                Some(data) => {
                    let decision = self
                        .family
                        .continue_or_finalize(&state.ctx, data, &link, state.chain_ended);
                    self.apply(state, decision)
                }
                None => {
                    let failed =
                        exception_response(&state.progress, "no pass-through data for outstanding link", None);
                    Next::Terminal(self.finish(state, failed))
                }
            },
        };

        match next {
            Next::Suspended(request) => Resumption::Suspended(request),
            Next::Terminal(response) => Resumption::Terminal(response),
        }
    }

    /// Build the family's compensating request for a chain that failed.
    ///
    /// Never issued automatically; the caller decides whether to send it.
    pub fn rollback_request(&self, state: &ChainState<F::Specific>) -> Option<RemoteTaskRequest> {
        if state.finalized != Some(StepStatus::Failed) {
            return None;
        }
        let data = state.pass_through.as_ref()?;
        let task = self.family.rollback(&state.ctx, data)?;
        let id = RequestId::next(&state.ctx.scope.execution_id);
        info!(step = %state.step, request_id = %id, task_type = %task.task_type, "rollback prepared");
        Some(task.into_request(id, state.ctx.default_timeout))
    }

    fn check_response(state: &ChainState<F::Specific>, id: &RequestId) -> Result<(), ProtocolError> {
        if state.finalized.is_some() {
            return Err(ProtocolError::ChainFinalized(id.clone()));
        }
        if state.resolved.contains(id) {
            return Err(ProtocolError::Duplicate(id.clone()));
        }
        if state.outstanding.as_ref() != Some(id) {
            return Err(ProtocolError::UnknownRequest(id.clone()));
        }
        Ok(())
    }

    fn apply(
        &self,
        state: &mut ChainState<F::Specific>,
        decision: StepResult<ChainDecision<F::Specific>>,
    ) -> Next {
        let decision = match decision {
            Ok(decision) => decision,
            Err(err) => {
                let failed = error_response(&state.progress, &err);
                return Next::Terminal(self.finish(state, failed));
            }
        };

        match decision {
            ChainDecision::Dispatch {
                task,
                pass_through,
                chain_end,
            } => {
                if state.chain_ended {
                    let response = exception_response(
                        &state.progress,
                        "link dispatched after the chain declared its end",
                        None,
                    );
                    return Next::Terminal(self.finish(state, response));
                }

                let id = RequestId::next(&state.ctx.scope.execution_id);
                let request = task.into_request(id.clone(), state.ctx.default_timeout);
                for unit in request.units() {
                    state.progress.queue(unit);
                }
                state.pass_through = Some(pass_through);
                state.chain_ended = chain_end;
                state.outstanding = Some(id.clone());
                state.links += 1;
                info!(
                    step = %state.step,
                    request_id = %id,
                    task_type = %request.task_type(),
                    link = state.links,
                    chain_end,
                    "link dispatched"
                );
                Next::Suspended(request)
            }
            ChainDecision::Finalize(data) => {
                let response = finalize_by_tag(&state.progress, data);
                Next::Terminal(self.finish(state, response))
            }
            ChainDecision::Complete(response) => {
                let response = response.with_prior_progress(state.progress.clone());
                Next::Terminal(self.finish(state, response))
            }
        }
    }

    fn finish(&self, state: &mut ChainState<F::Specific>, response: StepResponse) -> StepResponse {
        state.finalized = Some(response.status());
        state.outstanding = None;
        match response.failure() {
            Some(failure) => warn!(
                step = %state.step,
                links = state.links,
                code = %failure.code,
                message = %failure.message,
                "chain finalized as failed"
            ),
            None => info!(step = %state.step, links = state.links, "chain finalized"),
        }
        response
    }
}

fn finalize_by_tag<S>(progress: &UnitProgressLog, data: PassThroughData<S>) -> StepResponse {
    match data {
        PassThroughData::FetchFailure(failure) => {
            let log = merged(progress, Some(&failure.unit_progress));
            StepResponse::failed(log, FailureInfo::user_input(failure.message))
        }
        PassThroughData::ExceptionContext(exception) => {
            exception_response(progress, &exception.message, Some(&exception.unit_progress))
        }
        PassThroughData::ExecutionContext(context) => {
            exception_response(progress, NO_TERMINAL_OUTCOME, Some(&context.unit_progress))
        }
        PassThroughData::StepSpecific(_) => exception_response(progress, NO_TERMINAL_OUTCOME, None),
    }
}

fn exception_response(
    progress: &UnitProgressLog,
    message: &str,
    carried: Option<&UnitProgressLog>,
) -> StepResponse {
    StepResponse::failed(merged(progress, carried), FailureInfo::application(message))
}

fn error_response(progress: &UnitProgressLog, err: &StepError) -> StepResponse {
    if err.is_user_input() {
        StepResponse::failed(progress.clone(), FailureInfo::user_input(err.to_string()))
    } else {
        exception_response(progress, &err.to_string(), None)
    }
}

fn merged(progress: &UnitProgressLog, carried: Option<&UnitProgressLog>) -> UnitProgressLog {
    let mut log = progress.clone();
    if let Some(carried) = carried {
        log.merge(carried.entries());
    }
    log
}
