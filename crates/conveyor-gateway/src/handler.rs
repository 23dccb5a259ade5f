//! Worker-side task handlers and the registry that selects them.

use std::collections::HashMap;
use std::sync::Arc;

use conveyor_core::{RemoteTaskRequest, SharedProgress, TaskResult};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

/// Executes one kind of remote task.
///
/// Runs on a blocking thread. The handler reports unit progress through
/// `progress`, which arrives pre-seeded with the request's units queued.
/// Once the worker gives up on the request the log is frozen; a long
/// handler should check [`SharedProgress::is_frozen`] between phases and
/// stop early.
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &str;

    fn execute(&self, request: &RemoteTaskRequest, progress: &SharedProgress) -> TaskResult;
}

/// Maps task types to handlers for one pool of workers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    /// Tags this pool advertises to target selectors.
    advertised: Vec<String>,
}

impl HandlerRegistry {
    pub fn new(advertised: Vec<String>) -> Self {
        Self {
            handlers: HashMap::new(),
            advertised,
        }
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        let task_type = handler.task_type().to_string();
        debug!(%task_type, "task handler registered");
        self.handlers.insert(task_type, handler);
        self
    }

    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn advertised(&self) -> &[String] {
        &self.advertised
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Pick the handler for `request`, checking its target selector.
    pub fn resolve(&self, request: &RemoteTaskRequest) -> GatewayResult<Arc<dyn TaskHandler>> {
        let handler = self
            .handlers
            .get(request.task_type())
            .ok_or_else(|| GatewayError::NoHandler(request.task_type().to_string()))?;

        if !request.selector().matches(&self.advertised) {
            return Err(GatewayError::SelectorMismatch {
                task_type: request.task_type().to_string(),
                required: request.selector().tags.clone(),
                advertised: self.advertised.clone(),
            });
        }
        Ok(Arc::clone(handler))
    }
}
