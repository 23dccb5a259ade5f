//! Pull request capability and the payloads exchanged with the worker.

use serde::{Deserialize, Serialize};

use crate::error::GitResult;

/// Published at stage scope by the create step, read by the merge step.
pub const CREATE_PR_OUTCOME: &str = "createPROutcome";

pub const CREATE_PR_TASK: &str = "GITOPS_CREATE_PR";
pub const MERGE_PR_TASK: &str = "GITOPS_MERGE_PR";

pub const UPDATE_FILES_UNIT: &str = "UpdateReleaseRepo";
pub const CREATE_PR_UNIT: &str = "CreatePullRequest";
pub const MERGE_PR_UNIT: &str = "MergePullRequest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrParams {
    pub connector: String,
    pub repo: String,
    pub branch: String,
    pub files: Vec<FileChange>,
    pub title: String,
}

/// Carried from the create dispatch to its finalize link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrPassThrough {
    pub repo: String,
    pub file_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPr {
    pub pr_number: u64,
    pub commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrOutcome {
    pub repo: String,
    pub pr_number: u64,
    pub commit_id: String,
    pub changed_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePrParams {
    #[serde(default)]
    pub connector: String,
    /// Overrides the repository recorded by the create step.
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePrTask {
    pub connector: String,
    pub repo: String,
    pub pr_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedPr {
    pub pr_number: u64,
    pub sha: String,
}

pub trait PullRequestApi: Send + Sync {
    /// Commit `files` onto `branch` and open a pull request for it.
    fn create_pull_request(&self, repo: &str, branch: &str, title: &str, files: &[FileChange])
    -> GitResult<CreatedPr>;

    fn merge_pull_request(&self, repo: &str, pr_number: u64) -> GitResult<MergedPr>;
}
