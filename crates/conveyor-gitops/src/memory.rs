//! In-memory pull request provider.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

use crate::api::{CreatedPr, FileChange, MergedPr, PullRequestApi};
use crate::error::{GitError, GitResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub repo: String,
    pub branch: String,
    pub title: String,
    pub commit_id: String,
    pub files: Vec<FileChange>,
    pub merged: bool,
}

#[derive(Default)]
struct RepoState {
    repos: Vec<String>,
    prs: BTreeMap<u64, PullRequest>,
    next_number: u64,
    unavailable: Option<String>,
}

/// Repositories and pull requests held in memory.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<RepoState>,
}

impl InMemoryRepository {
    pub fn new<I, S>(repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(RepoState {
                repos: repos.into_iter().map(Into::into).collect(),
                next_number: 1,
                ..RepoState::default()
            }),
        }
    }

    /// Fail every call with `message` until cleared.
    pub fn set_unavailable(&self, message: Option<&str>) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = message.map(str::to_string);
        }
    }

    pub fn pull_request(&self, number: u64) -> Option<PullRequest> {
        self.state.lock().ok()?.prs.get(&number).cloned()
    }

    fn state(&self) -> GitResult<std::sync::MutexGuard<'_, RepoState>> {
        let state = self
            .state
            .lock()
            .map_err(|e| GitError::Api(format!("repository state poisoned: {e}")))?;
        if let Some(message) = &state.unavailable {
            return Err(GitError::Api(message.clone()));
        }
        Ok(state)
    }
}

impl PullRequestApi for InMemoryRepository {
    fn create_pull_request(
        &self,
        repo: &str,
        branch: &str,
        title: &str,
        files: &[FileChange],
    ) -> GitResult<CreatedPr> {
        let mut state = self.state()?;
        if !state.repos.iter().any(|r| r == repo) {
            return Err(GitError::NotFound(format!("repository {repo} not found")));
        }
        if files.is_empty() {
            return Err(GitError::Conflict("no files to commit".to_string()));
        }

        let number = state.next_number.max(1);
        state.next_number = number + 1;
        let commit_id = format!("{:040x}", number);
        state.prs.insert(
            number,
            PullRequest {
                number,
                repo: repo.to_string(),
                branch: branch.to_string(),
                title: title.to_string(),
                commit_id: commit_id.clone(),
                files: files.to_vec(),
                merged: false,
            },
        );
        debug!(%repo, %branch, pr_number = number, "pull request opened");
        Ok(CreatedPr {
            pr_number: number,
            commit_id,
        })
    }

    fn merge_pull_request(&self, repo: &str, pr_number: u64) -> GitResult<MergedPr> {
        let mut state = self.state()?;
        let pr = state
            .prs
            .get_mut(&pr_number)
            .filter(|pr| pr.repo == repo)
            .ok_or_else(|| GitError::NotFound(format!("pull request #{pr_number} not found in {repo}")))?;
        if pr.merged {
            return Err(GitError::Conflict(format!("pull request #{pr_number} is already merged")));
        }
        pr.merged = true;
        debug!(%repo, pr_number, "pull request merged");
        Ok(MergedPr {
            pr_number,
            sha: format!("m{}", pr.commit_id),
        })
    }
}
