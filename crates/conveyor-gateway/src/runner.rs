//! ChainRunner: the async driver that walks a chain to its terminal response.

use std::sync::Arc;

use conveyor_chain::{Orchestrator, Resumption, StepContext, StepFamily, Started};
use conveyor_core::{FailureInfo, RemoteTaskRequest, RemoteTaskResponse, StepResponse};
use tracing::{error, warn};

use crate::pool::PoolHandle;
use crate::router::ResponseRouter;

/// Drives chains of one step family through a worker pool.
///
/// Holds at most one outstanding request per chain: the next request is
/// submitted only after the previous response has been resumed. The run
/// always ends in exactly one terminal response, including when the
/// gateway shuts down underneath it.
pub struct ChainRunner<F> {
    orchestrator: Arc<Orchestrator<F>>,
    pool: PoolHandle,
    router: ResponseRouter,
}

impl<F> Clone for ChainRunner<F> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            pool: self.pool.clone(),
            router: self.router.clone(),
        }
    }
}

impl<F: StepFamily> ChainRunner<F> {
    pub fn new(orchestrator: Arc<Orchestrator<F>>, pool: PoolHandle, router: ResponseRouter) -> Self {
        Self {
            orchestrator,
            pool,
            router,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<F> {
        &self.orchestrator
    }

    /// Run one chain to completion.
    pub async fn run(&self, ctx: StepContext, params: &F::Params) -> StepResponse {
        let (request, mut state) = match self.orchestrator.start(ctx, params) {
            Started::Suspended(request, state) => (request, state),
            Started::Terminal(response) => return response,
        };

        let mut pending = self.dispatch(request).await;
        loop {
            match self.orchestrator.resume(&mut state, pending) {
                Resumption::Suspended(next) => pending = self.dispatch(next).await,
                Resumption::Terminal(response) => return response,
                Resumption::Discarded(protocol) => {
                    // Never leave the outstanding request hanging.
                    let Some(id) = state.outstanding().cloned() else {
                        return StepResponse::failed(
                            state.progress().clone(),
                            FailureInfo::application(protocol.to_string()),
                        );
                    };
                    warn!(step = %state.step(), error = %protocol, "failing outstanding request");
                    pending = RemoteTaskResponse::exception(id, protocol.to_string());
                }
            }
        }
    }

    /// Submit one request and wait for its routed response.
    ///
    /// Every path ends in a response for `request`'s id: the worker's, or
    /// a synthetic exception when the request cannot be placed or the
    /// gateway stops first.
    async fn dispatch(&self, request: RemoteTaskRequest) -> RemoteTaskResponse {
        let id = request.id().clone();
        let waiter = match self.router.register(id.clone()).await {
            Ok(waiter) => waiter,
            Err(e) => {
                error!(request_id = %id, error = %e, "cannot await task response");
                return RemoteTaskResponse::exception(id, format!("task submission failed: {e}"));
            }
        };

        if let Err(e) = self.pool.dispatch(request).await {
            error!(request_id = %id, error = %e, "task submission failed");
            self.router.cancel(&id).await;
            return RemoteTaskResponse::exception(id, format!("task submission failed: {e}"));
        }

        match waiter.await {
            Ok(response) => response,
            Err(_) => RemoteTaskResponse::exception(id, "response channel closed before the task answered"),
        }
    }
}
