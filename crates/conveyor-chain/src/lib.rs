//! conveyor-chain — the chained remote-task orchestrator.
//!
//! A step is a chain of links. Each link is a [`StepFamily`] callback that
//! either dispatches one remote task (carrying [`PassThroughData`] to the
//! next link) or finalizes. The [`Orchestrator`] owns the protocol:
//! request correlation, duplicate suppression, unit progress, and the
//! guarantee of exactly one terminal [`conveyor_core::StepResponse`].

pub mod context;
pub mod error;
pub mod family;
pub mod orchestrator;
pub mod pass_through;

pub use context::StepContext;
pub use error::{ProtocolError, StepError, StepResult};
pub use family::{ChainDecision, LinkAnswer, LinkResponse, StepFamily};
pub use orchestrator::{ChainState, Orchestrator, Resumption, Started};
pub use pass_through::{ExceptionContext, ExecutionContext, FetchFailure, PassThroughData};
