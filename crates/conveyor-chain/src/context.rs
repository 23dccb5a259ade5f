//! Everything a step family may read while building a link.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conveyor_state::{ExecutionScope, OutputStoreExt, ScopeLevel, SweepingOutputStore};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StepResult;

#[derive(Clone)]
pub struct StepContext {
    pub scope: ExecutionScope,
    pub outputs: Arc<dyn SweepingOutputStore>,
    /// Applied to requests whose task spec declares no timeout.
    pub default_timeout: Duration,
}

impl StepContext {
    pub fn new(scope: ExecutionScope, outputs: Arc<dyn SweepingOutputStore>, default_timeout: Duration) -> Self {
        Self {
            scope,
            outputs,
            default_timeout,
        }
    }

    /// Resolve `name` nearest-first across this step's ancestry.
    pub fn resolve<T: DeserializeOwned>(&self, name: &str) -> StepResult<Option<T>> {
        Ok(self.scope.resolve_nearest_typed(self.outputs.as_ref(), name)?)
    }

    pub fn publish<T: Serialize>(&self, level: ScopeLevel, name: &str, value: &T) -> StepResult<()> {
        Ok(self.outputs.publish_typed(&self.scope.at(level), name, value)?)
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("scope", &self.scope)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
