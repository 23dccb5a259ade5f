//! Create-PR and merge-PR step families.

use conveyor_chain::{
    ChainDecision, LinkAnswer, LinkResponse, PassThroughData, StepContext, StepError, StepFamily, StepResult,
};
use conveyor_core::{FailureInfo, RemoteTaskRequest, StepOutcome, StepResponse, UnitProgressLog};
use conveyor_state::ScopeLevel;
use tracing::{info, warn};

use crate::api::{
    CREATE_PR_OUTCOME, CREATE_PR_TASK, CREATE_PR_UNIT, CreatePrOutcome, CreatePrParams, CreatePrPassThrough,
    CreatedPr, MERGE_PR_TASK, MERGE_PR_UNIT, MergePrParams, MergePrTask, MergedPr, UPDATE_FILES_UNIT,
};

pub const PR_DETAILS_MISSING: &str = "pull request details are missing";

/// Map a worker result to either its success value or a terminal response.
fn success_value<'r>(
    response: &LinkResponse<'r>,
    progress: &UnitProgressLog,
) -> Result<&'r serde_json::Value, StepResponse> {
    match response.answer {
        LinkAnswer::Success(value) => Ok(value),
        LinkAnswer::Failure(e) => Err(StepResponse::failed(progress.clone(), FailureInfo::worker(e))),
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: &serde_json::Value, what: &str) -> StepResult<T> {
    serde_json::from_value(value.clone()).map_err(|e| StepError::Unexpected(format!("malformed {what}: {e}")))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreatePrStep;

impl StepFamily for CreatePrStep {
    type Params = CreatePrParams;
    type Specific = CreatePrPassThrough;

    fn name(&self) -> &str {
        "gitops-create-pr"
    }

    fn start_link(&self, _ctx: &StepContext, params: &CreatePrParams) -> StepResult<ChainDecision<CreatePrPassThrough>> {
        if params.files.is_empty() {
            return Err(StepError::InvalidFormat("no files to update in the release repo".to_string()));
        }
        let task = RemoteTaskRequest::builder(CREATE_PR_TASK)
            .with_parameters(serde_json::to_value(params)?)
            .with_units([UPDATE_FILES_UNIT, CREATE_PR_UNIT]);
        let pass_through = CreatePrPassThrough {
            repo: params.repo.clone(),
            file_paths: params.files.iter().map(|f| f.path.clone()).collect(),
        };
        info!(repo = %params.repo, branch = %params.branch, files = pass_through.file_paths.len(), "create PR request built");
        Ok(ChainDecision::dispatch_last(task, PassThroughData::StepSpecific(pass_through)))
    }

    fn continue_or_finalize(
        &self,
        ctx: &StepContext,
        data: PassThroughData<CreatePrPassThrough>,
        response: &LinkResponse<'_>,
        _chain_end: bool,
    ) -> StepResult<ChainDecision<CreatePrPassThrough>> {
        let PassThroughData::StepSpecific(carried) = data else {
            return Ok(ChainDecision::Finalize(data));
        };
        let progress = response.progress();
        let value = match success_value(response, &progress) {
            Ok(value) => value,
            Err(failed) => return Ok(ChainDecision::Complete(failed)),
        };

        let created: CreatedPr = decode(value, "create PR result")?;
        let outcome = CreatePrOutcome {
            repo: carried.repo,
            pr_number: created.pr_number,
            commit_id: created.commit_id,
            changed_files: carried.file_paths,
        };
        ctx.publish(ScopeLevel::Stage, CREATE_PR_OUTCOME, &outcome)?;
        info!(pr_number = outcome.pr_number, repo = %outcome.repo, "pull request created");

        Ok(ChainDecision::Complete(StepResponse::succeeded(
            progress,
            vec![StepOutcome::new("output", serde_json::to_value(&outcome)?)],
        )))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergePrStep;

impl StepFamily for MergePrStep {
    type Params = MergePrParams;
    type Specific = MergePrTask;

    fn name(&self) -> &str {
        "gitops-merge-pr"
    }

    fn start_link(&self, ctx: &StepContext, params: &MergePrParams) -> StepResult<ChainDecision<MergePrTask>> {
        let Some(created) = ctx.resolve::<CreatePrOutcome>(CREATE_PR_OUTCOME)? else {
            warn!(execution_id = %ctx.scope.execution_id, "no pull request to merge");
            return Ok(ChainDecision::Finalize(PassThroughData::fetch_failure(PR_DETAILS_MISSING)));
        };
        let task_params = MergePrTask {
            connector: params.connector.clone(),
            repo: params.repo.clone().unwrap_or(created.repo),
            pr_number: created.pr_number,
        };
        let task = RemoteTaskRequest::builder(MERGE_PR_TASK)
            .with_parameters(serde_json::to_value(&task_params)?)
            .with_units([MERGE_PR_UNIT]);
        Ok(ChainDecision::dispatch_last(task, PassThroughData::StepSpecific(task_params)))
    }

    fn continue_or_finalize(
        &self,
        _ctx: &StepContext,
        data: PassThroughData<MergePrTask>,
        response: &LinkResponse<'_>,
        _chain_end: bool,
    ) -> StepResult<ChainDecision<MergePrTask>> {
        if !matches!(data, PassThroughData::StepSpecific(_)) {
            return Ok(ChainDecision::Finalize(data));
        }
        let progress = response.progress();
        let value = match success_value(response, &progress) {
            Ok(value) => value,
            Err(failed) => return Ok(ChainDecision::Complete(failed)),
        };
        let merged: MergedPr = decode(value, "merge PR result")?;
        info!(pr_number = merged.pr_number, sha = %merged.sha, "pull request merged");
        Ok(ChainDecision::Complete(StepResponse::succeeded(
            progress,
            vec![StepOutcome::new("output", serde_json::to_value(&merged)?)],
        )))
    }
}
