//! Capability interfaces over a cloud provider.
//!
//! Calls are synchronous: they run inside one worker invocation, never
//! across a chain suspension point.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LbResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub arn: String,
    pub load_balancer_arn: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "forward")]
    pub action_type: String,
    #[serde(default)]
    pub target_group_arn: Option<String>,
}

fn forward() -> String {
    "forward".to_string()
}

impl Action {
    pub fn forward_to(target_group_arn: &str) -> Self {
        Self {
            action_type: forward(),
            target_group_arn: Some(target_group_arn.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub arn: String,
    pub listener_arn: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub arn: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub min: u32,
    pub target: u32,
    pub max: u32,
}

impl Capacity {
    pub const ZERO: Capacity = Capacity {
        min: 0,
        target: 0,
        max: 0,
    };
}

/// One page request: an optional continuation marker and a page size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub marker: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// More data exists only while this is set and non-empty.
    pub next_marker: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_marker: None,
        }
    }
}

pub trait LoadBalancerApi: Send + Sync {
    /// Load balancers whose name matches exactly; empty when there are none.
    fn describe_load_balancers(&self, name: &str) -> LbResult<Vec<LoadBalancer>>;

    fn describe_listeners(&self, load_balancer_arn: &str, page: &PageRequest) -> LbResult<Page<Listener>>;

    fn describe_rules(&self, listener_arn: &str, page: &PageRequest) -> LbResult<Page<Rule>>;

    fn describe_target_groups(&self, target_group_arn: &str, page: &PageRequest) -> LbResult<Page<TargetGroup>>;

    fn modify_listener_default_action(&self, listener_arn: &str, target_group_arn: &str) -> LbResult<()>;

    fn modify_rule_action(&self, rule_arn: &str, target_group_arn: &str) -> LbResult<()>;
}

pub trait ComputeGroupApi: Send + Sync {
    fn rename_group(&self, group_id: &str, name: &str) -> LbResult<()>;

    fn resize_group(&self, group_id: &str, capacity: Capacity) -> LbResult<()>;

    /// Block until the group reaches its requested capacity or `timeout` expires.
    fn wait_for_steady_state(&self, group_id: &str, timeout: Duration) -> LbResult<()>;
}
