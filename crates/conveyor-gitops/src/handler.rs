//! Worker-side handlers for the PR tasks.

use std::sync::Arc;

use conveyor_core::{CoreResult, RemoteTaskRequest, SharedProgress, TaskError, TaskErrorKind, TaskResult};
use conveyor_gateway::TaskHandler;
use serde::Serialize;
use tracing::{error, warn};

use crate::api::{
    CREATE_PR_TASK, CREATE_PR_UNIT, CreatePrParams, MERGE_PR_TASK, MERGE_PR_UNIT, MergePrTask, PullRequestApi,
    UPDATE_FILES_UNIT,
};
use crate::error::GitError;

fn task_error(e: &GitError) -> TaskError {
    let kind = match e {
        GitError::NotFound(_) => TaskErrorKind::NotFound,
        GitError::Conflict(_) | GitError::Api(_) => TaskErrorKind::Command,
    };
    TaskError::new(kind, e.to_string())
}

fn encode<T: Serialize>(value: &T) -> TaskResult {
    match serde_json::to_value(value) {
        Ok(value) => TaskResult::Success(value),
        Err(e) => TaskResult::exception(format!("cannot encode result: {e}")),
    }
}

fn record(unit: &str, recorded: CoreResult<()>) {
    if let Err(e) = recorded {
        warn!(%unit, error = %e, "unit progress not recorded");
    }
}

fn mark(progress: &SharedProgress, unit: &str, outcome: Result<(), &GitError>) {
    let recorded = match outcome {
        Ok(()) => progress.succeed(unit, None),
        Err(e) => progress.fail(unit, Some(&e.to_string())),
    };
    record(unit, recorded);
}

fn invalid(e: serde_json::Error) -> TaskResult {
    TaskResult::Failure(TaskError::new(
        TaskErrorKind::InvalidFormat,
        format!("invalid task parameters: {e}"),
    ))
}

pub struct CreatePrHandler<R> {
    repo: Arc<R>,
}

impl<R: PullRequestApi> CreatePrHandler<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }
}

impl<R: PullRequestApi + 'static> TaskHandler for CreatePrHandler<R> {
    fn task_type(&self) -> &str {
        CREATE_PR_TASK
    }

    fn execute(&self, request: &RemoteTaskRequest, progress: &SharedProgress) -> TaskResult {
        let params: CreatePrParams = match request.decode_parameters() {
            Ok(params) => params,
            Err(e) => return invalid(e),
        };
        // The provider commits the files and opens the PR in one call.
        record(UPDATE_FILES_UNIT, progress.start(UPDATE_FILES_UNIT));
        record(CREATE_PR_UNIT, progress.start(CREATE_PR_UNIT));

        match self
            .repo
            .create_pull_request(&params.repo, &params.branch, &params.title, &params.files)
        {
            Ok(created) => {
                mark(progress, UPDATE_FILES_UNIT, Ok(()));
                mark(progress, CREATE_PR_UNIT, Ok(()));
                encode(&created)
            }
            Err(e) => {
                error!(repo = %params.repo, error = %e, "create PR failed");
                mark(progress, UPDATE_FILES_UNIT, Err(&e));
                mark(progress, CREATE_PR_UNIT, Err(&e));
                TaskResult::Failure(task_error(&e))
            }
        }
    }
}

pub struct MergePrHandler<R> {
    repo: Arc<R>,
}

impl<R: PullRequestApi> MergePrHandler<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }
}

impl<R: PullRequestApi + 'static> TaskHandler for MergePrHandler<R> {
    fn task_type(&self) -> &str {
        MERGE_PR_TASK
    }

    fn execute(&self, request: &RemoteTaskRequest, progress: &SharedProgress) -> TaskResult {
        let task: MergePrTask = match request.decode_parameters() {
            Ok(task) => task,
            Err(e) => return invalid(e),
        };
        record(MERGE_PR_UNIT, progress.start(MERGE_PR_UNIT));
        match self.repo.merge_pull_request(&task.repo, task.pr_number) {
            Ok(merged) => {
                mark(progress, MERGE_PR_UNIT, Ok(()));
                encode(&merged)
            }
            Err(e) => {
                error!(repo = %task.repo, pr_number = task.pr_number, error = %e, "merge PR failed");
                mark(progress, MERGE_PR_UNIT, Err(&e));
                TaskResult::Failure(task_error(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conveyor_core::{RequestId, TaskSpec, UnitStatus};

    use super::*;
    use crate::api::FileChange;
    use crate::memory::InMemoryRepository;

    fn create_request(repo: &str) -> RemoteTaskRequest {
        let params = CreatePrParams {
            connector: "github".to_string(),
            repo: repo.to_string(),
            branch: "release/1.2".to_string(),
            title: "Release 1.2".to_string(),
            files: vec![FileChange {
                path: "deploy/values.yaml".to_string(),
                content: "tag: 1.2".to_string(),
            }],
        };
        TaskSpec::new(CREATE_PR_TASK, serde_json::to_value(&params).unwrap())
            .with_units([UPDATE_FILES_UNIT, CREATE_PR_UNIT])
            .into_request(RequestId::new("pr-1"), Duration::from_secs(60))
    }

    fn run(handler: &CreatePrHandler<InMemoryRepository>, request: &RemoteTaskRequest) -> (TaskResult, SharedProgress) {
        let progress = SharedProgress::with_units(request.units());
        (handler.execute(request, &progress), progress)
    }

    #[test]
    fn files_are_updated_only_when_the_provider_succeeds() {
        let handler = CreatePrHandler::new(Arc::new(InMemoryRepository::new(["release-repo"])));
        let (result, progress) = run(&handler, &create_request("release-repo"));
        assert!(matches!(result, TaskResult::Success(_)));
        let log = progress.snapshot();
        assert_eq!(log.get(UPDATE_FILES_UNIT).unwrap().status, UnitStatus::Success);
        assert_eq!(log.get(CREATE_PR_UNIT).unwrap().status, UnitStatus::Success);
    }

    #[test]
    fn provider_failure_fails_both_units() {
        let repo = Arc::new(InMemoryRepository::new(["release-repo"]));
        repo.set_unavailable(Some("rate limited"));
        let handler = CreatePrHandler::new(repo);

        let (result, progress) = run(&handler, &create_request("release-repo"));
        let TaskResult::Failure(e) = result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(e.kind, TaskErrorKind::Command);

        let log = progress.snapshot();
        for unit in [UPDATE_FILES_UNIT, CREATE_PR_UNIT] {
            let entry = log.get(unit).unwrap();
            assert_eq!(entry.status, UnitStatus::Failure, "{unit}");
            assert_eq!(entry.note.as_deref(), Some("git provider error: rate limited"));
            assert!(entry.ended_at.is_some());
        }
    }

    #[test]
    fn bad_parameters_touch_no_units() {
        let handler = CreatePrHandler::new(Arc::new(InMemoryRepository::new(["release-repo"])));
        let request = TaskSpec::new(CREATE_PR_TASK, serde_json::json!({ "repo": 7 }))
            .with_units([UPDATE_FILES_UNIT, CREATE_PR_UNIT])
            .into_request(RequestId::new("pr-1"), Duration::from_secs(60));
        let (result, progress) = run(&handler, &request);
        assert!(matches!(result, TaskResult::Failure(ref e) if e.kind == TaskErrorKind::InvalidFormat));
        assert!(progress.snapshot().entries().iter().all(|u| u.status == UnitStatus::Queued));
    }
}
