//! Swap-route mode: run one blue/green swap chain end to end.
//!
//! The run:
//! 1. Opens the configured output store
//! 2. Seeds the stage setup outcome at stage scope
//! 3. Spawns a gateway whose pool serves `BLUE_GREEN_SWAP_ROUTE` over the fleet
//! 4. Drives the chain to its terminal response, then shuts the gateway down

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use conveyor_chain::{Orchestrator, StepContext};
use conveyor_core::{ConveyorConfig, StateBackend, StateConfig, StepResponse, now_millis};
use conveyor_gateway::{Gateway, HandlerRegistry};
use conveyor_lb::{CloudFixture, InMemoryCloud};
use conveyor_state::{
    ExecutionScope, MemoryOutputStore, OutputStoreExt, RedbOutputStore, ScopeLevel, SweepingOutputStore,
};
use conveyor_swap::{SETUP_OUTCOME, StageSetupOutcome, SwapRouteParams, SwapRouteStep, SwapRouteTaskHandler};
use tokio::sync::watch;
use tracing::info;

pub fn load_fixture(path: &Path) -> anyhow::Result<CloudFixture> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read fixture {}", path.display()))?;
    CloudFixture::from_json(&content).with_context(|| format!("parse fixture {}", path.display()))
}

pub fn load_setup(path: &Path) -> anyhow::Result<StageSetupOutcome> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read setup {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse setup {}", path.display()))
}

pub fn open_store(config: &StateConfig) -> anyhow::Result<Arc<dyn SweepingOutputStore>> {
    match config.backend {
        StateBackend::Memory => {
            info!("in-memory output store");
            Ok(Arc::new(MemoryOutputStore::new()))
        }
        StateBackend::Redb => {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = RedbOutputStore::open(&config.path)?;
            info!(path = ?config.path, "output store opened");
            Ok(Arc::new(store))
        }
    }
}

/// Where a daemon run publishes: one pipeline, one stage, one step.
pub fn execution_scope(execution_id: &str) -> ExecutionScope {
    ExecutionScope::new(execution_id, "conveyord", "blue-green", "swap-route")
}

pub fn next_execution_id() -> String {
    format!("exec-{}", now_millis())
}

/// Run the swap chain against `cloud` and return its terminal response.
pub async fn run(
    config: &ConveyorConfig,
    cloud: Arc<InMemoryCloud>,
    store: Arc<dyn SweepingOutputStore>,
    scope: ExecutionScope,
    setup: &StageSetupOutcome,
    params: &SwapRouteParams,
) -> anyhow::Result<StepResponse> {
    let execution_id = scope.execution_id.clone();
    store.publish_typed(&scope.at(ScopeLevel::Stage), SETUP_OUTCOME, setup)?;
    info!(%execution_id, prefix = %setup.name_prefix, "stage setup outcome seeded");

    // ── Gateway ──────────────────────────────────────────────────
    let registry = HandlerRegistry::new(config.gateway.tags.clone()).with(Arc::new(SwapRouteTaskHandler::new(
        cloud,
        config.pagination.clone(),
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway = Gateway::spawn(&config.gateway, registry, shutdown_rx);

    // ── Chain ────────────────────────────────────────────────────
    let ctx = StepContext::new(scope, store, config.gateway.default_timeout()?);
    let runner = gateway.runner(Arc::new(Orchestrator::new(SwapRouteStep)));
    let response = runner.run(ctx, params).await;

    let _ = shutdown_tx.send(true);
    gateway.join().await;
    info!(%execution_id, status = ?response.status(), "swap route finished");
    Ok(response)
}
