//! conveyor-swap — blue/green traffic swap built on the chain orchestrator.
//!
//! [`SwapRouteStep`] resolves the stage setup outcome, dispatches a single
//! `BLUE_GREEN_SWAP_ROUTE` task and publishes a [`SwapRouteOutcome`].
//! [`SwapRouteTaskHandler`] is the worker side: it renames the compute
//! groups, swaps every load-balancer binding prod-first, then optionally
//! downsizes the retiring group.

pub mod handler;
pub mod outcome;
pub mod step;

pub use handler::SwapRouteTaskHandler;
pub use outcome::{
    ComputeGroupRef, DOWNSIZE_UNIT, DOWNSIZE_WAIT_UNIT, RENAME_UNIT, ResizeStrategy, SETUP_OUTCOME,
    SWAP_ROUTE_OUTCOME, SWAP_ROUTE_TASK, SWAP_ROUTE_UNITS, SWAP_UNIT, StageSetupOutcome, SwapRouteOutcome,
    SwapRouteParams, SwapRouteResult, SwapRouteTaskParams, stage_group_name,
};
pub use step::{SETUP_NOT_FOUND, SwapRouteStep};
