//! Types exchanged between the setup step, the swap step and its worker.

use conveyor_lb::{LoadBalancerBinding, SwapDetails};
use serde::{Deserialize, Serialize};

/// Published by the stage setup step; resolved nearest-first.
pub const SETUP_OUTCOME: &str = "blueGreenStageSetupOutcome";

/// Published by the swap step at step scope.
pub const SWAP_ROUTE_OUTCOME: &str = "blueGreenSwapRouteOutcome";

pub const SWAP_ROUTE_TASK: &str = "BLUE_GREEN_SWAP_ROUTE";

/// Suffix appended to the name prefix for the retiring group.
pub const STAGE_SUFFIX: &str = "STAGE";

// Unit names, in execution order.
pub const RENAME_UNIT: &str = "RenameGroups";
pub const SWAP_UNIT: &str = "SwapListenerRules";
pub const DOWNSIZE_UNIT: &str = "Downsize";
pub const DOWNSIZE_WAIT_UNIT: &str = "DownsizeSteadyStateWait";

pub const SWAP_ROUTE_UNITS: [&str; 4] = [RENAME_UNIT, SWAP_UNIT, DOWNSIZE_UNIT, DOWNSIZE_WAIT_UNIT];

/// Name the retiring group receives: `{prefix}__STAGE`.
pub fn stage_group_name(prefix: &str) -> String {
    format!("{prefix}__{STAGE_SUFFIX}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeGroupRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeStrategy {
    #[default]
    ResizeNewFirst,
    DownsizeOldFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSetupOutcome {
    pub name_prefix: String,
    #[serde(default)]
    pub new_group: Option<ComputeGroupRef>,
    #[serde(default)]
    pub old_group: Option<ComputeGroupRef>,
    #[serde(default)]
    pub resize_strategy: ResizeStrategy,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerBinding>,
}

/// User-facing parameters of the swap step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRouteParams {
    #[serde(default)]
    pub downsize_old_group: bool,
    /// Duration string such as `"10m"`. Bounds the steady-state wait.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Parameters carried by the `BLUE_GREEN_SWAP_ROUTE` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRouteTaskParams {
    pub prod_group_name: String,
    pub stage_group_name: String,
    /// Empty when the setup produced no new group.
    #[serde(default)]
    pub new_group_id: String,
    /// Empty on a first-ever deployment.
    #[serde(default)]
    pub old_group_id: String,
    #[serde(default)]
    pub downsize_old_group: bool,
    #[serde(default)]
    pub resize_strategy: ResizeStrategy,
    pub steady_state_timeout: String,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerBinding>,
}

impl SwapRouteTaskParams {
    /// Derive the request from a resolved setup outcome.
    pub fn from_setup(setup: &StageSetupOutcome, downsize_old_group: bool, steady_state_timeout: String) -> Self {
        let id = |group: &Option<ComputeGroupRef>| group.as_ref().map(|g| g.id.clone()).unwrap_or_default();
        Self {
            prod_group_name: setup.name_prefix.clone(),
            stage_group_name: stage_group_name(&setup.name_prefix),
            new_group_id: id(&setup.new_group),
            old_group_id: id(&setup.old_group),
            downsize_old_group,
            resize_strategy: setup.resize_strategy,
            steady_state_timeout,
            load_balancers: setup.load_balancers.clone(),
        }
    }

    /// The same swap with the groups' roles exchanged.
    pub fn reversed(&self) -> Self {
        Self {
            new_group_id: self.old_group_id.clone(),
            old_group_id: self.new_group_id.clone(),
            downsize_old_group: false,
            ..self.clone()
        }
    }
}

/// What the worker reports after a successful swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRouteResult {
    pub old_group_id: String,
    pub old_group_name: String,
    pub new_group_id: String,
    pub new_group_name: String,
    pub lb_details: Vec<SwapDetails>,
    pub downsize_old_group: bool,
}

/// Published under [`SWAP_ROUTE_OUTCOME`] for later steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRouteOutcome {
    pub old_group_id: String,
    pub old_group_name: String,
    pub new_group_id: String,
    pub new_group_name: String,
    pub lb_details: Vec<SwapDetails>,
    pub downsize_old_group: bool,
}

impl From<SwapRouteResult> for SwapRouteOutcome {
    fn from(r: SwapRouteResult) -> Self {
        Self {
            old_group_id: r.old_group_id,
            old_group_name: r.old_group_name,
            new_group_id: r.new_group_id,
            new_group_name: r.new_group_name,
            lb_details: r.lb_details,
            downsize_old_group: r.downsize_old_group,
        }
    }
}
