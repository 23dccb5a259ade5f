//! conveyor-gitops — git-backed pull request steps.
//!
//! [`CreatePrStep`] commits file changes to a release repository and opens
//! a pull request, publishing a [`CreatePrOutcome`] at stage scope.
//! [`MergePrStep`] resolves that outcome and merges the pull request.
//! Both are single-hop chains served by the handlers in [`handler`].

pub mod api;
pub mod error;
pub mod handler;
pub mod memory;
pub mod step;

pub use api::{
    CREATE_PR_OUTCOME, CREATE_PR_TASK, CreatePrOutcome, CreatePrParams, CreatePrPassThrough, CreatedPr,
    FileChange, MERGE_PR_TASK, MergePrParams, MergePrTask, MergedPr, PullRequestApi,
};
pub use error::{GitError, GitResult};
pub use handler::{CreatePrHandler, MergePrHandler};
pub use memory::{InMemoryRepository, PullRequest};
pub use step::{CreatePrStep, MergePrStep, PR_DETAILS_MISSING};
