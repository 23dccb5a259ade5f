//! Worker-side execution of `BLUE_GREEN_SWAP_ROUTE`.
//!
//! Runs the fixed sequence rename → swap every binding → conditional
//! downsize inside one task invocation, reporting each phase as a unit.

use std::sync::Arc;

use conveyor_core::{
    CoreResult, PaginationConfig, RemoteTaskRequest, SharedProgress, TaskError, TaskErrorKind, TaskResult,
    parse_duration,
};
use conveyor_gateway::TaskHandler;
use conveyor_lb::{Capacity, ComputeGroupApi, LbError, LoadBalancerApi, RuleMatcher, SwapDetails};
use tracing::{error, info, warn};

use crate::outcome::{
    DOWNSIZE_UNIT, DOWNSIZE_WAIT_UNIT, RENAME_UNIT, SWAP_ROUTE_TASK, SWAP_UNIT, SwapRouteResult,
    SwapRouteTaskParams,
};

const NOTHING_TO_DOWNSIZE: &str = "nothing to downsize";
const ABANDONED: &str = "swap route abandoned: the worker stopped waiting for this task";

pub struct SwapRouteTaskHandler<C> {
    cloud: Arc<C>,
    pagination: PaginationConfig,
}

impl<C> SwapRouteTaskHandler<C>
where
    C: LoadBalancerApi + ComputeGroupApi,
{
    pub fn new(cloud: Arc<C>, pagination: PaginationConfig) -> Self {
        Self { cloud, pagination }
    }

    fn rename(&self, params: &SwapRouteTaskParams) -> Result<(), LbError> {
        let renames = [
            (&params.new_group_id, &params.prod_group_name),
            (&params.old_group_id, &params.stage_group_name),
        ];
        for (id, name) in renames {
            if id.is_empty() {
                warn!(%name, "no group id, skipping rename");
                continue;
            }
            self.cloud.rename_group(id, name)?;
            info!(group_id = %id, %name, "group renamed");
        }
        Ok(())
    }

    /// Swap every binding in order. Returns `None` once the worker has
    /// given up on this task; the remaining bindings are left alone.
    fn swap(
        &self,
        params: &SwapRouteTaskParams,
        progress: &SharedProgress,
    ) -> Option<Result<Vec<SwapDetails>, LbError>> {
        let matcher = RuleMatcher::new(self.cloud.as_ref(), self.pagination.clone());
        let mut details = Vec::with_capacity(params.load_balancers.len());
        for binding in &params.load_balancers {
            if progress.is_frozen() {
                return None;
            }
            match matcher.swap_target_groups(binding) {
                Ok(swapped) => details.push(swapped),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(details))
    }

    fn downsize(&self, params: &SwapRouteTaskParams, progress: &SharedProgress) -> Result<(), LbError> {
        if !params.downsize_old_group || params.old_group_id.is_empty() {
            info!(downsize = params.downsize_old_group, "nothing to downsize");
            record(progress.succeed(DOWNSIZE_UNIT, Some(NOTHING_TO_DOWNSIZE)));
            record(progress.succeed(DOWNSIZE_WAIT_UNIT, Some(NOTHING_TO_DOWNSIZE)));
            return Ok(());
        }

        let id = &params.old_group_id;
        record(progress.start(DOWNSIZE_UNIT));
        let timeout = parse_duration(&params.steady_state_timeout)
            .map_err(|e| LbError::InvalidFormat(e.to_string()))
            .inspect_err(|e| record(progress.fail(DOWNSIZE_UNIT, Some(&e.to_string()))))?;
        self.cloud
            .resize_group(id, Capacity::ZERO)
            .inspect_err(|e| record(progress.fail(DOWNSIZE_UNIT, Some(&e.to_string()))))?;
        info!(group_id = %id, "old group resized to zero");
        record(progress.succeed(DOWNSIZE_UNIT, None));

        record(progress.start(DOWNSIZE_WAIT_UNIT));
        self.cloud
            .wait_for_steady_state(id, timeout)
            .inspect_err(|e| record(progress.fail(DOWNSIZE_WAIT_UNIT, Some(&e.to_string()))))?;
        info!(group_id = %id, timeout_secs = timeout.as_secs(), "old group reached steady state");
        record(progress.succeed(DOWNSIZE_WAIT_UNIT, None));
        Ok(())
    }
}

impl<C> TaskHandler for SwapRouteTaskHandler<C>
where
    C: LoadBalancerApi + ComputeGroupApi + 'static,
{
    fn task_type(&self) -> &str {
        SWAP_ROUTE_TASK
    }

    fn execute(&self, request: &RemoteTaskRequest, progress: &SharedProgress) -> TaskResult {
        let params: SwapRouteTaskParams = match request.decode_parameters() {
            Ok(params) => params,
            Err(e) => {
                return TaskResult::Failure(TaskError::new(
                    TaskErrorKind::InvalidFormat,
                    format!("invalid swap route parameters: {e}"),
                ));
            }
        };

        record(progress.start(RENAME_UNIT));
        if let Err(e) = self.rename(&params) {
            return fail(progress, RENAME_UNIT, e);
        }
        record(progress.succeed(RENAME_UNIT, None));

        record(progress.start(SWAP_UNIT));
        let lb_details = match self.swap(&params, progress) {
            Some(Ok(details)) => details,
            Some(Err(e)) => return fail(progress, SWAP_UNIT, e),
            None => return abandoned(),
        };
        record(progress.succeed(SWAP_UNIT, Some("route updated")));

        // Never start a destructive resize for a task nobody waits on.
        if progress.is_frozen() {
            return abandoned();
        }
        if let Err(e) = self.downsize(&params, progress) {
            return failure(e);
        }

        let result = SwapRouteResult {
            old_group_name: if params.old_group_id.is_empty() {
                String::new()
            } else {
                params.stage_group_name.clone()
            },
            new_group_name: if params.new_group_id.is_empty() {
                String::new()
            } else {
                params.prod_group_name.clone()
            },
            old_group_id: params.old_group_id,
            new_group_id: params.new_group_id,
            lb_details,
            downsize_old_group: params.downsize_old_group,
        };
        match serde_json::to_value(&result) {
            Ok(value) => TaskResult::Success(value),
            Err(e) => TaskResult::exception(format!("cannot encode swap route result: {e}")),
        }
    }
}

fn record(result: CoreResult<()>) {
    if let Err(e) = result {
        warn!(error = %e, "unit progress not recorded");
    }
}

fn abandoned() -> TaskResult {
    warn!("worker gave up on the task, stopping early");
    TaskResult::exception(ABANDONED)
}

fn fail(progress: &SharedProgress, unit: &str, e: LbError) -> TaskResult {
    record(progress.fail(unit, Some(&e.to_string())));
    failure(e)
}

fn failure(e: LbError) -> TaskResult {
    error!(error = %e, "swap route failed");
    let kind = match e {
        LbError::NotFound(_) => TaskErrorKind::NotFound,
        LbError::InvalidFormat(_) => TaskErrorKind::InvalidFormat,
        LbError::PaginationLimit { .. } | LbError::Api(_) => TaskErrorKind::Command,
    };
    TaskResult::Failure(TaskError::new(kind, e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conveyor_core::{RequestId, TaskSpec, UnitProgressLog, UnitStatus};
    use conveyor_lb::{CloudCall, CloudFixture, CloudOp, ComputeGroup, InMemoryCloud, LoadBalancerBinding};

    use super::*;

    fn cloud() -> Arc<InMemoryCloud> {
        let group = |id: &str, name: &str| ComputeGroup {
            id: id.into(),
            name: name.into(),
            capacity: Capacity {
                min: 1,
                target: 2,
                max: 4,
            },
        };
        Arc::new(InMemoryCloud::new(CloudFixture {
            groups: vec![group("ig-new", "web__STAGE"), group("ig-old", "web")],
            ..CloudFixture::default()
        }))
    }

    fn params(old: &str, downsize: bool, timeout: &str) -> SwapRouteTaskParams {
        SwapRouteTaskParams {
            prod_group_name: "web".into(),
            stage_group_name: "web__STAGE".into(),
            new_group_id: "ig-new".into(),
            old_group_id: old.into(),
            downsize_old_group: downsize,
            resize_strategy: Default::default(),
            steady_state_timeout: timeout.into(),
            load_balancers: vec![],
        }
    }

    fn request(params: &SwapRouteTaskParams) -> RemoteTaskRequest {
        TaskSpec::new(SWAP_ROUTE_TASK, serde_json::to_value(params).unwrap())
            .with_units([RENAME_UNIT, SWAP_UNIT, DOWNSIZE_UNIT, DOWNSIZE_WAIT_UNIT])
            .into_request(RequestId::new("t-1"), Duration::from_secs(60))
    }

    fn run(cloud: &Arc<InMemoryCloud>, params: &SwapRouteTaskParams) -> (TaskResult, UnitProgressLog) {
        let handler = SwapRouteTaskHandler::new(cloud.clone(), PaginationConfig::default());
        let request = request(params);
        let progress = SharedProgress::with_units(request.units());
        let result = handler.execute(&request, &progress);
        (result, progress.snapshot())
    }

    #[test]
    fn renames_both_groups() {
        let cloud = cloud();
        let (result, progress) = run(&cloud, &params("ig-old", false, "10m"));
        assert!(matches!(result, TaskResult::Success(_)));
        assert_eq!(cloud.group("ig-new").unwrap().name, "web");
        assert_eq!(cloud.group("ig-old").unwrap().name, "web__STAGE");
        assert!(progress.is_terminal());
    }

    #[test]
    fn empty_old_id_skips_its_rename_only() {
        let cloud = cloud();
        let (result, _) = run(&cloud, &params("", true, "10m"));
        let TaskResult::Success(value) = result else {
            panic!("expected success");
        };
        assert_eq!(
            cloud.calls(),
            vec![CloudCall::RenameGroup {
                group_id: "ig-new".into(),
                name: "web".into(),
            }]
        );
        assert_eq!(value["old_group_name"], "");
    }

    #[test]
    fn downsize_resizes_to_zero_and_waits() {
        let cloud = cloud();
        let (result, progress) = run(&cloud, &params("ig-old", true, "10m"));
        assert!(matches!(result, TaskResult::Success(_)));
        let calls = cloud.calls();
        assert!(calls.contains(&CloudCall::ResizeGroup {
            group_id: "ig-old".into(),
            capacity: Capacity::ZERO,
        }));
        assert!(calls.contains(&CloudCall::WaitForSteadyState {
            group_id: "ig-old".into(),
            timeout: Duration::from_secs(600),
        }));
        assert_eq!(progress.get(DOWNSIZE_WAIT_UNIT).unwrap().status, UnitStatus::Success);
    }

    #[test]
    fn no_downsize_notes_nothing_to_do() {
        let cloud = cloud();
        let (_, progress) = run(&cloud, &params("ig-old", false, "10m"));
        assert!(
            !cloud
                .calls()
                .iter()
                .any(|c| matches!(c, CloudCall::ResizeGroup { .. }))
        );
        let unit = progress.get(DOWNSIZE_UNIT).unwrap();
        assert_eq!(unit.status, UnitStatus::Success);
        assert_eq!(unit.note.as_deref(), Some(NOTHING_TO_DOWNSIZE));
    }

    #[test]
    fn bad_steady_state_timeout_is_invalid_format() {
        let cloud = cloud();
        let (result, progress) = run(&cloud, &params("ig-old", true, "10x"));
        let TaskResult::Failure(e) = result else {
            panic!("expected failure");
        };
        assert_eq!(e.kind, TaskErrorKind::InvalidFormat);
        assert_eq!(progress.get(DOWNSIZE_UNIT).unwrap().status, UnitStatus::Failure);
        assert!(
            !cloud
                .calls()
                .iter()
                .any(|c| matches!(c, CloudCall::ResizeGroup { .. }))
        );
    }

    #[test]
    fn rename_api_error_fails_the_task() {
        let cloud = cloud();
        cloud.fail_on(CloudOp::RenameGroup, "throttled");
        let (result, progress) = run(&cloud, &params("ig-old", false, "10m"));
        let TaskResult::Failure(e) = result else {
            panic!("expected failure");
        };
        assert_eq!(e.kind, TaskErrorKind::Command);
        assert_eq!(e.message, "provider error: throttled");
        assert_eq!(progress.get(RENAME_UNIT).unwrap().status, UnitStatus::Failure);
        assert_eq!(progress.get(SWAP_UNIT).unwrap().status, UnitStatus::Queued);
    }

    #[test]
    fn undecodable_parameters_are_invalid_format() {
        let cloud = cloud();
        let handler = SwapRouteTaskHandler::new(cloud, PaginationConfig::default());
        let request = TaskSpec::new(SWAP_ROUTE_TASK, serde_json::json!({ "bogus": 1 }))
            .into_request(RequestId::new("t-2"), Duration::from_secs(1));
        let result = handler.execute(&request, &SharedProgress::default());
        assert!(matches!(
            result,
            TaskResult::Failure(TaskError {
                kind: TaskErrorKind::InvalidFormat,
                ..
            })
        ));
    }

    #[test]
    fn frozen_progress_stops_before_any_swap_or_resize() {
        let cloud = cloud();
        let handler = SwapRouteTaskHandler::new(cloud.clone(), PaginationConfig::default());
        let mut task = params("ig-old", true, "10m");
        task.load_balancers = vec![LoadBalancerBinding {
            load_balancer: "web-lb".into(),
            prod_listener_port: "80".into(),
            prod_rule: "arn:rule/web-lb/80/default".into(),
            stage_listener_port: "8080".into(),
            stage_rule: "arn:rule/web-lb/8080/default".into(),
        }];
        let request = request(&task);
        let progress = SharedProgress::with_units(request.units());
        progress.freeze();

        let result = handler.execute(&request, &progress);
        assert!(result.is_exception());
        // Renames are not guarded; nothing after them runs.
        assert!(
            cloud
                .calls()
                .iter()
                .all(|c| matches!(c, CloudCall::RenameGroup { .. }))
        );
    }
}
