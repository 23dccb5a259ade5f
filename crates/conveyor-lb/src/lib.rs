//! conveyor-lb — load-balancer capability and blue/green rule matching.
//!
//! The [`api`] traits describe what a provider must offer; [`RuleMatcher`]
//! swaps the prod and stage target groups of one binding on top of them.
//! Every list call goes through [`paginate`], which bounds continuation
//! marker loops. [`memory::InMemoryCloud`] is a provider for tests and
//! local runs.

pub mod api;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod paginate;

pub use api::{
    Action, Capacity, ComputeGroupApi, Listener, LoadBalancer, LoadBalancerApi, Page, PageRequest, Rule,
    TargetGroup,
};
pub use error::{LbError, LbResult};
pub use matcher::{ListenerTarget, LoadBalancerBinding, RuleMatcher, SwapDetails, listener_by_port, parse_port};
pub use memory::{CloudCall, CloudFixture, CloudOp, ComputeGroup, InMemoryCloud};
pub use paginate::{paginate, scan};
