//! The swap-route step family.
//!
//! Single-hop from the orchestrator's point of view: one dispatch with
//! `chain_end` set, then a terminal response built from the worker result.

use std::time::Duration;

use conveyor_chain::{
    ChainDecision, LinkAnswer, LinkResponse, PassThroughData, StepContext, StepError, StepFamily, StepResult,
};
use conveyor_core::{
    FailureInfo, RemoteTaskRequest, StepOutcome, StepResponse, TaskSpec, format_duration, parse_duration,
};
use conveyor_state::ScopeLevel;
use tracing::{info, warn};

use crate::outcome::{
    SETUP_OUTCOME, SWAP_ROUTE_OUTCOME, SWAP_ROUTE_TASK, SWAP_ROUTE_UNITS, StageSetupOutcome, SwapRouteOutcome,
    SwapRouteParams, SwapRouteResult, SwapRouteTaskParams,
};

pub const SETUP_NOT_FOUND: &str = "stage setup outcome not found";

/// Time the worker gets on top of the steady-state wait for renames and
/// listener swaps.
pub const SWAP_HEADROOM: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, Default)]
pub struct SwapRouteStep;

impl SwapRouteStep {
    fn task(params: &SwapRouteTaskParams) -> StepResult<TaskSpec> {
        Ok(RemoteTaskRequest::builder(SWAP_ROUTE_TASK)
            .with_parameters(serde_json::to_value(params)?)
            .with_units(SWAP_ROUTE_UNITS))
    }
}

impl StepFamily for SwapRouteStep {
    type Params = SwapRouteParams;
    type Specific = SwapRouteTaskParams;

    fn name(&self) -> &str {
        "blue-green-swap-route"
    }

    fn start_link(
        &self,
        ctx: &StepContext,
        params: &SwapRouteParams,
    ) -> StepResult<ChainDecision<SwapRouteTaskParams>> {
        let Some(setup) = ctx.resolve::<StageSetupOutcome>(SETUP_OUTCOME)? else {
            warn!(execution_id = %ctx.scope.execution_id, "no stage setup outcome to swap");
            return Ok(ChainDecision::Finalize(PassThroughData::fetch_failure(SETUP_NOT_FOUND)));
        };

        let timeout = match &params.timeout {
            Some(raw) => parse_duration(raw)?,
            None => ctx.default_timeout,
        };
        let task_params = SwapRouteTaskParams::from_setup(&setup, params.downsize_old_group, format_duration(timeout));
        info!(
            prefix = %setup.name_prefix,
            new_group = %task_params.new_group_id,
            old_group = %task_params.old_group_id,
            bindings = task_params.load_balancers.len(),
            downsize = params.downsize_old_group,
            "swap route request built"
        );

        let task_timeout = timeout.saturating_add(SWAP_HEADROOM).max(ctx.default_timeout);
        let task = Self::task(&task_params)?.with_timeout(task_timeout);
        Ok(ChainDecision::dispatch_last(task, PassThroughData::StepSpecific(task_params)))
    }

    fn continue_or_finalize(
        &self,
        ctx: &StepContext,
        data: PassThroughData<SwapRouteTaskParams>,
        response: &LinkResponse<'_>,
        _chain_end: bool,
    ) -> StepResult<ChainDecision<SwapRouteTaskParams>> {
        if !matches!(data, PassThroughData::StepSpecific(_)) {
            return Ok(ChainDecision::Finalize(data));
        }
        let progress = response.progress();

        let value = match response.answer {
            LinkAnswer::Success(value) => value,
            LinkAnswer::Failure(e) => {
                return Ok(ChainDecision::Complete(StepResponse::failed(progress, FailureInfo::worker(e))));
            }
        };

        let result: SwapRouteResult = serde_json::from_value(value.clone())
            .map_err(|e| StepError::Unexpected(format!("malformed swap route result: {e}")))?;
        let outcome = SwapRouteOutcome::from(result);
        ctx.publish(ScopeLevel::Step, SWAP_ROUTE_OUTCOME, &outcome)?;
        info!(
            new_group = %outcome.new_group_name,
            old_group = %outcome.old_group_name,
            bindings = outcome.lb_details.len(),
            "swap route outcome published"
        );

        Ok(ChainDecision::Complete(StepResponse::succeeded(
            progress,
            vec![StepOutcome::new("output", serde_json::to_value(&outcome)?)],
        )))
    }

    /// Swap traffic back by re-running the swap with the roles exchanged.
    fn rollback(&self, _ctx: &StepContext, data: &PassThroughData<SwapRouteTaskParams>) -> Option<TaskSpec> {
        let params = data.specific()?;
        Self::task(&params.reversed()).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conveyor_chain::{Orchestrator, Resumption, Started};
    use conveyor_core::{
        FailureType, RemoteTaskResponse, RequestId, StepStatus, TaskError, TaskErrorKind, UnitProgressLog, UnitStatus,
    };
    use conveyor_state::{ExecutionScope, MemoryOutputStore, OutputStoreExt};
    use serde_json::json;

    use super::*;
    use crate::outcome::ComputeGroupRef;

    fn setup() -> StageSetupOutcome {
        StageSetupOutcome {
            name_prefix: "web".into(),
            new_group: Some(ComputeGroupRef {
                id: "ig-new".into(),
                name: "web__STAGE".into(),
            }),
            old_group: Some(ComputeGroupRef {
                id: "ig-old".into(),
                name: "web".into(),
            }),
            resize_strategy: Default::default(),
            region: "us-east-1".into(),
            load_balancers: vec![],
        }
    }

    fn ctx(store: &Arc<MemoryOutputStore>) -> StepContext {
        StepContext::new(
            ExecutionScope::new("exec-s", "pipe", "deploy", "swap"),
            store.clone(),
            Duration::from_secs(60),
        )
    }

    fn seeded() -> (Arc<MemoryOutputStore>, StepContext) {
        let store = Arc::new(MemoryOutputStore::new());
        let ctx = ctx(&store);
        store
            .publish_typed(&ctx.scope.at(ScopeLevel::Stage), SETUP_OUTCOME, &setup())
            .unwrap();
        (store, ctx)
    }

    fn params(timeout: Option<&str>) -> SwapRouteParams {
        SwapRouteParams {
            downsize_old_group: true,
            timeout: timeout.map(str::to_string),
        }
    }

    fn start(ctx: StepContext, params: &SwapRouteParams) -> (RemoteTaskRequest, conveyor_chain::ChainState<SwapRouteTaskParams>) {
        match Orchestrator::new(SwapRouteStep).start(ctx, params) {
            Started::Suspended(request, state) => (request, state),
            Started::Terminal(resp) => panic!("expected a dispatch, got {resp:?}"),
        }
    }

    #[test]
    fn missing_setup_fails_without_dispatch() {
        let store = Arc::new(MemoryOutputStore::new());
        let Started::Terminal(resp) = Orchestrator::new(SwapRouteStep).start(ctx(&store), &params(None)) else {
            panic!("expected a terminal response");
        };
        let failure = resp.failure().unwrap();
        assert_eq!(failure.message, SETUP_NOT_FOUND);
        assert_eq!(failure.failure_types, vec![FailureType::UserInput]);
    }

    #[test]
    fn request_carries_groups_units_and_chain_end() {
        let (_store, ctx) = seeded();
        let (request, state) = start(ctx, &params(Some("10m")));

        assert_eq!(request.task_type(), SWAP_ROUTE_TASK);
        assert_eq!(request.units(), SWAP_ROUTE_UNITS.map(String::from).as_slice());
        assert!(state.chain_ended());

        let task: SwapRouteTaskParams = request.decode_parameters().unwrap();
        assert_eq!(task.new_group_id, "ig-new");
        assert_eq!(task.old_group_id, "ig-old");
        assert_eq!(task.stage_group_name, "web__STAGE");
        assert!(task.downsize_old_group);
        assert_eq!(parse_duration(&task.steady_state_timeout).unwrap(), Duration::from_secs(600));
        // The task outlives the steady-state wait it contains.
        assert_eq!(request.timeout(), Duration::from_secs(600) + SWAP_HEADROOM);
    }

    #[test]
    fn bad_timeout_is_user_input() {
        let (_store, ctx) = seeded();
        let Started::Terminal(resp) = Orchestrator::new(SwapRouteStep).start(ctx, &params(Some("ten minutes")))
        else {
            panic!("expected a terminal response");
        };
        assert_eq!(resp.failure().unwrap().failure_types, vec![FailureType::UserInput]);
    }

    #[test]
    fn success_publishes_outcome_at_step_scope() {
        let (store, ctx) = seeded();
        let scope = ctx.scope.clone();
        let orchestrator = Orchestrator::new(SwapRouteStep);
        let (request, mut state) = match orchestrator.start(ctx, &params(None)) {
            Started::Suspended(r, s) => (r, s),
            Started::Terminal(resp) => panic!("{resp:?}"),
        };

        let result = json!({
            "old_group_id": "ig-old", "old_group_name": "web__STAGE",
            "new_group_id": "ig-new", "new_group_name": "web",
            "lb_details": [], "downsize_old_group": true
        });
        let mut log = UnitProgressLog::with_units(request.units());
        for unit in request.units() {
            log.succeed(unit, None).unwrap();
        }
        let response = RemoteTaskResponse::success(request.id().clone(), result, log.into_entries());

        let Resumption::Terminal(resp) = orchestrator.resume(&mut state, response) else {
            panic!("expected a terminal response");
        };
        assert_eq!(resp.status(), StepStatus::Succeeded);
        assert_eq!(resp.outcome("output").unwrap().value["new_group_name"], "web");

        let published: SwapRouteOutcome = store
            .resolve_typed(&scope.at(ScopeLevel::Step), SWAP_ROUTE_OUTCOME)
            .unwrap()
            .unwrap();
        assert_eq!(published.old_group_id, "ig-old");
    }

    #[test]
    fn worker_failure_keeps_message_and_closes_units() {
        let (_store, ctx) = seeded();
        let orchestrator = Orchestrator::new(SwapRouteStep);
        let (request, mut state) = match orchestrator.start(ctx, &params(None)) {
            Started::Suspended(r, s) => (r, s),
            Started::Terminal(resp) => panic!("{resp:?}"),
        };

        let mut log = UnitProgressLog::with_units(request.units());
        log.succeed("RenameGroups", None).unwrap();
        log.fail("SwapListenerRules", Some("listener with port 9443 is not present")).unwrap();
        let response = RemoteTaskResponse::failure(
            request.id().clone(),
            TaskError::new(TaskErrorKind::NotFound, "listener with port 9443 is not present"),
            log.into_entries(),
        );

        let Resumption::Terminal(resp) = orchestrator.resume(&mut state, response) else {
            panic!("expected a terminal response");
        };
        assert_eq!(resp.failure().unwrap().message, "listener with port 9443 is not present");
        assert!(resp.unit_progress().iter().all(|u| u.status.is_terminal()));
        let downsize = resp.unit_progress().iter().find(|u| u.unit_name == "Downsize").unwrap();
        assert_eq!(downsize.status, UnitStatus::Failure);

        let rollback = orchestrator.rollback_request(&state).unwrap();
        let reversed: SwapRouteTaskParams = rollback.decode_parameters().unwrap();
        assert_eq!(reversed.new_group_id, "ig-old");
        assert!(!reversed.downsize_old_group);
    }

    #[test]
    fn malformed_result_is_application_failure() {
        let (_store, ctx) = seeded();
        let orchestrator = Orchestrator::new(SwapRouteStep);
        let (request, mut state) = match orchestrator.start(ctx, &params(None)) {
            Started::Suspended(r, s) => (r, s),
            Started::Terminal(resp) => panic!("{resp:?}"),
        };
        let response = RemoteTaskResponse::success(request.id().clone(), json!({ "unexpected": true }), vec![]);
        let Resumption::Terminal(resp) = orchestrator.resume(&mut state, response) else {
            panic!("expected a terminal response");
        };
        let failure = resp.failure().unwrap();
        assert_eq!(failure.failure_types, vec![FailureType::Application]);
        assert!(failure.message.contains("malformed swap route result"));
    }

    #[test]
    fn stray_response_is_discarded() {
        let (_store, ctx) = seeded();
        let (_request, mut state) = start(ctx, &params(None));
        let stray = RemoteTaskResponse::exception(RequestId::new("stray"), "late");
        assert!(matches!(
            Orchestrator::new(SwapRouteStep).resume(&mut state, stray),
            Resumption::Discarded(_)
        ));
    }
}
