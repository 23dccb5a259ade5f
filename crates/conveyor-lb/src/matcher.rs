//! Rule matching and the prod/stage target-group swap.
//!
//! For one binding, the matcher finds the prod and stage listeners by
//! port, reads the target group each referenced rule currently forwards
//! to, then swaps them. The prod side is always rewritten first.

use conveyor_core::PaginationConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::{Listener, LoadBalancer, LoadBalancerApi, Rule, TargetGroup};
use crate::error::{LbError, LbResult};
use crate::paginate::{paginate, scan};

/// One traffic rule pair to swap. Ports are strings as supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerBinding {
    pub load_balancer: String,
    pub prod_listener_port: String,
    pub prod_rule: String,
    pub stage_listener_port: String,
    pub stage_rule: String,
}

/// Where one side of a binding points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerTarget {
    pub listener_arn: String,
    pub listener_port: u16,
    pub rule_arn: String,
    /// Rewritten through the listener's default action rather than the rule.
    pub default_rule: bool,
    pub target_group_arn: String,
    pub target_group_name: String,
}

/// A binding after the swap: `prod` now forwards to what was the stage
/// target group and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapDetails {
    pub load_balancer: String,
    pub load_balancer_arn: String,
    pub prod: ListenerTarget,
    pub stage: ListenerTarget,
}

pub struct RuleMatcher<'a, L: ?Sized> {
    api: &'a L,
    pagination: PaginationConfig,
}

impl<'a, L: LoadBalancerApi + ?Sized> RuleMatcher<'a, L> {
    pub fn new(api: &'a L, pagination: PaginationConfig) -> Self {
        Self { api, pagination }
    }

    pub fn resolve_load_balancer(&self, name: &str) -> LbResult<LoadBalancer> {
        self.api
            .describe_load_balancers(name)?
            .into_iter()
            .next()
            .ok_or_else(|| LbError::NotFound(format!("load balancer {name} not present in account")))
    }

    pub fn listeners(&self, load_balancer_arn: &str) -> LbResult<Vec<Listener>> {
        paginate("listeners", &self.pagination, |page| {
            self.api.describe_listeners(load_balancer_arn, page)
        })
    }

    /// Whether `rule_arn` is the default rule of `listener_arn`.
    pub fn is_default_rule(&self, listener_arn: &str, rule_arn: &str) -> LbResult<bool> {
        let found = scan(
            "rules",
            &self.pagination,
            |page| self.api.describe_rules(listener_arn, page),
            |rules: Vec<Rule>| {
                rules
                    .iter()
                    .find(|r| r.is_default)
                    .filter(|r| r.arn.eq_ignore_ascii_case(rule_arn))
                    .map(|_| ())
            },
        )?;
        Ok(found.is_some())
    }

    /// The target group the rule's first action forwards to.
    pub fn current_target_group(&self, listener_arn: &str, rule_arn: &str) -> LbResult<String> {
        let rule = scan(
            "rules",
            &self.pagination,
            |page| self.api.describe_rules(listener_arn, page),
            |rules: Vec<Rule>| rules.into_iter().find(|r| r.arn.eq_ignore_ascii_case(rule_arn)),
        )?
        .ok_or_else(|| {
            LbError::NotFound(format!(
                "listener rule {rule_arn} is not present in listener {listener_arn}"
            ))
        })?;

        let Some(action) = rule.actions.first() else {
            return Err(LbError::NotFound(format!("no action is present in listener rule {rule_arn}")));
        };
        match action.target_group_arn.as_deref() {
            Some(arn) if !arn.is_empty() => Ok(arn.to_string()),
            _ => Err(LbError::NotFound(format!(
                "listener rule {rule_arn} has no target group attached to its first action"
            ))),
        }
    }

    pub fn target_group_name(&self, target_group_arn: &str) -> LbResult<String> {
        scan(
            "target groups",
            &self.pagination,
            |page| self.api.describe_target_groups(target_group_arn, page),
            |groups: Vec<TargetGroup>| {
                groups
                    .into_iter()
                    .find(|g| g.arn.eq_ignore_ascii_case(target_group_arn))
                    .map(|g| g.name)
            },
        )?
        .ok_or_else(|| LbError::NotFound(format!("target group {target_group_arn} is not present")))
    }

    /// Resolve one side of a binding as it stands now.
    fn resolve_side(
        &self,
        load_balancer: &str,
        listeners: &[Listener],
        port: &str,
        rule_arn: &str,
    ) -> LbResult<ListenerTarget> {
        let listener = listener_by_port(listeners, port, load_balancer)?;
        let target_group_arn = self.current_target_group(&listener.arn, rule_arn)?;
        let target_group_name = self.target_group_name(&target_group_arn)?;
        let default_rule = self.is_default_rule(&listener.arn, rule_arn)?;
        Ok(ListenerTarget {
            listener_arn: listener.arn.clone(),
            listener_port: listener.port,
            rule_arn: rule_arn.to_string(),
            default_rule,
            target_group_arn,
            target_group_name,
        })
    }

    fn forward(&self, side: &ListenerTarget, target_group_arn: &str) -> LbResult<()> {
        if side.default_rule {
            info!(listener = %side.listener_arn, target_group = %target_group_arn, "rewriting default listener action");
            self.api
                .modify_listener_default_action(&side.listener_arn, target_group_arn)
        } else {
            info!(rule = %side.rule_arn, target_group = %target_group_arn, "rewriting listener rule");
            self.api.modify_rule_action(&side.rule_arn, target_group_arn)
        }
    }

    /// Point prod at the stage target group and stage at the prod one.
    pub fn swap_target_groups(&self, binding: &LoadBalancerBinding) -> LbResult<SwapDetails> {
        let lb = self.resolve_load_balancer(&binding.load_balancer)?;
        let listeners = self.listeners(&lb.arn)?;
        debug!(load_balancer = %lb.name, listeners = listeners.len(), "listeners collected");

        let prod = self.resolve_side(&lb.name, &listeners, &binding.prod_listener_port, &binding.prod_rule)?;
        let stage = self.resolve_side(&lb.name, &listeners, &binding.stage_listener_port, &binding.stage_rule)?;

        self.forward(&prod, &stage.target_group_arn)?;
        self.forward(&stage, &prod.target_group_arn)?;
        info!(
            load_balancer = %lb.name,
            prod_target_group = %stage.target_group_name,
            stage_target_group = %prod.target_group_name,
            "target groups swapped"
        );

        Ok(SwapDetails {
            load_balancer: lb.name,
            load_balancer_arn: lb.arn,
            prod: ListenerTarget {
                target_group_arn: stage.target_group_arn.clone(),
                target_group_name: stage.target_group_name.clone(),
                ..prod.clone()
            },
            stage: ListenerTarget {
                target_group_arn: prod.target_group_arn,
                target_group_name: prod.target_group_name,
                ..stage
            },
        })
    }
}

/// Parse a user-supplied port.
pub fn parse_port(port: &str) -> LbResult<u16> {
    port.trim().parse::<u16>().map_err(|_| {
        LbError::InvalidFormat(format!(
            "listener port '{port}' is not a valid port number"
        ))
    })
}

pub fn listener_by_port<'l>(listeners: &'l [Listener], port: &str, load_balancer: &str) -> LbResult<&'l Listener> {
    let wanted = parse_port(port)?;
    listeners
        .iter()
        .find(|l| l.port == wanted)
        .ok_or_else(|| {
            LbError::NotFound(format!(
                "listener with port {port} is not present in load balancer {load_balancer}"
            ))
        })
}
