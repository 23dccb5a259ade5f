//! Gateway: a worker pool and a response router wired together.

use std::sync::Arc;

use conveyor_chain::{Orchestrator, StepFamily};
use conveyor_core::GatewayConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::handler::HandlerRegistry;
use crate::pool::{PoolHandle, WorkerPool};
use crate::router::{GATEWAY_SHUT_DOWN, ResponseRouter};
use crate::runner::ChainRunner;

pub struct Gateway {
    pool: WorkerPool,
    router: ResponseRouter,
    dispatch: JoinHandle<()>,
}

impl Gateway {
    /// Spawn the pool and the response dispatch loop on the current runtime.
    pub fn spawn(config: &GatewayConfig, registry: HandlerRegistry, shutdown: watch::Receiver<bool>) -> Self {
        let (response_tx, response_rx) = mpsc::channel(config.queue_capacity.max(1));
        let router = ResponseRouter::new();
        let dispatch = router.spawn_dispatch(response_rx, shutdown.clone());
        let pool = WorkerPool::spawn(config, Arc::new(registry), response_tx, shutdown);
        Self {
            pool,
            router,
            dispatch,
        }
    }

    pub fn pool(&self) -> PoolHandle {
        self.pool.handle()
    }

    pub fn router(&self) -> ResponseRouter {
        self.router.clone()
    }

    pub fn runner<F: StepFamily>(&self, orchestrator: Arc<Orchestrator<F>>) -> ChainRunner<F> {
        ChainRunner::new(orchestrator, self.pool.handle(), self.router.clone())
    }

    /// Wait for the pool and the dispatch loop to stop. Chains still
    /// waiting on a response are answered with a cancellation.
    pub async fn join(self) {
        self.pool.join().await;
        self.dispatch.abort();
        let _ = self.dispatch.await;
        self.router.fail_all(GATEWAY_SHUT_DOWN).await;
        info!("gateway stopped");
    }
}
