//! In-memory cloud provider.
//!
//! `InMemoryCloud` implements both capability traits over a fixture that
//! can be loaded from JSON. It records every applied mutating call, in
//! order, and supports injected failures and stuck continuation markers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{
    Action, Capacity, ComputeGroupApi, Listener, LoadBalancer, LoadBalancerApi, Page, PageRequest, Rule,
    TargetGroup,
};
use crate::error::{LbError, LbResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeGroup {
    pub id: String,
    pub name: String,
    pub capacity: Capacity,
}

/// Initial provider state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudFixture {
    pub load_balancers: Vec<LoadBalancer>,
    pub listeners: Vec<Listener>,
    pub rules: Vec<Rule>,
    pub target_groups: Vec<TargetGroup>,
    pub groups: Vec<ComputeGroup>,
}

impl CloudFixture {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Provider operations that can be made to fail or to page forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudOp {
    DescribeLoadBalancers,
    DescribeListeners,
    DescribeRules,
    DescribeTargetGroups,
    ModifyListenerDefaultAction,
    ModifyRuleAction,
    RenameGroup,
    ResizeGroup,
    WaitForSteadyState,
}

/// An applied mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudCall {
    ModifyListenerDefaultAction {
        listener_arn: String,
        target_group_arn: String,
    },
    ModifyRuleAction {
        rule_arn: String,
        target_group_arn: String,
    },
    RenameGroup {
        group_id: String,
        name: String,
    },
    ResizeGroup {
        group_id: String,
        capacity: Capacity,
    },
    WaitForSteadyState {
        group_id: String,
        timeout: Duration,
    },
}

#[derive(Default)]
struct CloudState {
    fixture: CloudFixture,
    calls: Vec<CloudCall>,
    failures: HashMap<CloudOp, String>,
    stuck: Vec<CloudOp>,
}

#[derive(Default)]
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
}

impl InMemoryCloud {
    pub fn new(fixture: CloudFixture) -> Self {
        Self {
            state: Mutex::new(CloudState {
                fixture,
                ..CloudState::default()
            }),
        }
    }

    /// Make every future call to `op` fail with `message`.
    pub fn fail_on(&self, op: CloudOp, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(op, message.to_string());
        }
    }

    /// Make `op` answer with empty pages that always carry a marker.
    pub fn stuck_token(&self, op: CloudOp) {
        if let Ok(mut state) = self.state.lock() {
            state.stuck.push(op);
        }
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn group(&self, group_id: &str) -> Option<ComputeGroup> {
        let state = self.state.lock().ok()?;
        state.fixture.groups.iter().find(|g| g.id == group_id).cloned()
    }

    /// Target group the rule's first action forwards to.
    pub fn forward_target(&self, rule_arn: &str) -> Option<String> {
        let state = self.state.lock().ok()?;
        state
            .fixture
            .rules
            .iter()
            .find(|r| r.arn.eq_ignore_ascii_case(rule_arn))
            .and_then(|r| r.actions.first())
            .and_then(|a| a.target_group_arn.clone())
    }

    fn enter(&self, op: CloudOp) -> LbResult<MutexGuard<'_, CloudState>> {
        let state = self
            .state
            .lock()
            .map_err(|e| LbError::Api(format!("cloud state poisoned: {e}")))?;
        if let Some(message) = state.failures.get(&op) {
            return Err(LbError::Api(message.clone()));
        }
        Ok(state)
    }

    fn page<T: Clone>(state: &CloudState, op: CloudOp, items: Vec<T>, request: &PageRequest) -> Page<T> {
        if state.stuck.contains(&op) {
            return Page {
                items: Vec::new(),
                next_marker: Some("stuck".to_string()),
            };
        }
        let start: usize = request
            .marker
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);
        let size = request.page_size.max(1);
        let end = (start + size).min(items.len());
        let slice = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
        Page {
            items: slice,
            next_marker: (end < items.len()).then(|| end.to_string()),
        }
    }
}

impl LoadBalancerApi for InMemoryCloud {
    fn describe_load_balancers(&self, name: &str) -> LbResult<Vec<LoadBalancer>> {
        let state = self.enter(CloudOp::DescribeLoadBalancers)?;
        Ok(state
            .fixture
            .load_balancers
            .iter()
            .filter(|lb| lb.name == name)
            .cloned()
            .collect())
    }

    fn describe_listeners(&self, load_balancer_arn: &str, page: &PageRequest) -> LbResult<Page<Listener>> {
        let state = self.enter(CloudOp::DescribeListeners)?;
        let items = state
            .fixture
            .listeners
            .iter()
            .filter(|l| l.load_balancer_arn.eq_ignore_ascii_case(load_balancer_arn))
            .cloned()
            .collect();
        Ok(Self::page(&state, CloudOp::DescribeListeners, items, page))
    }

    fn describe_rules(&self, listener_arn: &str, page: &PageRequest) -> LbResult<Page<Rule>> {
        let state = self.enter(CloudOp::DescribeRules)?;
        let items = state
            .fixture
            .rules
            .iter()
            .filter(|r| r.listener_arn.eq_ignore_ascii_case(listener_arn))
            .cloned()
            .collect();
        Ok(Self::page(&state, CloudOp::DescribeRules, items, page))
    }

    fn describe_target_groups(&self, target_group_arn: &str, page: &PageRequest) -> LbResult<Page<TargetGroup>> {
        let state = self.enter(CloudOp::DescribeTargetGroups)?;
        let items = state
            .fixture
            .target_groups
            .iter()
            .filter(|g| g.arn.eq_ignore_ascii_case(target_group_arn))
            .cloned()
            .collect();
        Ok(Self::page(&state, CloudOp::DescribeTargetGroups, items, page))
    }

    fn modify_listener_default_action(&self, listener_arn: &str, target_group_arn: &str) -> LbResult<()> {
        let mut state = self.enter(CloudOp::ModifyListenerDefaultAction)?;
        let rule = state
            .fixture
            .rules
            .iter_mut()
            .find(|r| r.is_default && r.listener_arn.eq_ignore_ascii_case(listener_arn))
            .ok_or_else(|| LbError::NotFound(format!("listener {listener_arn} has no default rule")))?;
        rule.actions = vec![Action::forward_to(target_group_arn)];
        state.calls.push(CloudCall::ModifyListenerDefaultAction {
            listener_arn: listener_arn.to_string(),
            target_group_arn: target_group_arn.to_string(),
        });
        debug!(%listener_arn, %target_group_arn, "default action modified");
        Ok(())
    }

    fn modify_rule_action(&self, rule_arn: &str, target_group_arn: &str) -> LbResult<()> {
        let mut state = self.enter(CloudOp::ModifyRuleAction)?;
        let rule = state
            .fixture
            .rules
            .iter_mut()
            .find(|r| r.arn.eq_ignore_ascii_case(rule_arn))
            .ok_or_else(|| LbError::NotFound(format!("rule {rule_arn} not found")))?;
        rule.actions = vec![Action::forward_to(target_group_arn)];
        state.calls.push(CloudCall::ModifyRuleAction {
            rule_arn: rule_arn.to_string(),
            target_group_arn: target_group_arn.to_string(),
        });
        debug!(%rule_arn, %target_group_arn, "rule action modified");
        Ok(())
    }
}

impl ComputeGroupApi for InMemoryCloud {
    fn rename_group(&self, group_id: &str, name: &str) -> LbResult<()> {
        let mut state = self.enter(CloudOp::RenameGroup)?;
        let group = state
            .fixture
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| LbError::NotFound(format!("compute group {group_id} not found")))?;
        group.name = name.to_string();
        state.calls.push(CloudCall::RenameGroup {
            group_id: group_id.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn resize_group(&self, group_id: &str, capacity: Capacity) -> LbResult<()> {
        let mut state = self.enter(CloudOp::ResizeGroup)?;
        let group = state
            .fixture
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| LbError::NotFound(format!("compute group {group_id} not found")))?;
        group.capacity = capacity;
        state.calls.push(CloudCall::ResizeGroup {
            group_id: group_id.to_string(),
            capacity,
        });
        Ok(())
    }

    fn wait_for_steady_state(&self, group_id: &str, timeout: Duration) -> LbResult<()> {
        let mut state = self.enter(CloudOp::WaitForSteadyState)?;
        if !state.fixture.groups.iter().any(|g| g.id == group_id) {
            return Err(LbError::NotFound(format!("compute group {group_id} not found")));
        }
        state.calls.push(CloudCall::WaitForSteadyState {
            group_id: group_id.to_string(),
            timeout,
        });
        Ok(())
    }
}
