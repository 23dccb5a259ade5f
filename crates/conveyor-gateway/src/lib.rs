//! conveyor-gateway — dispatches remote task requests to worker agents.
//!
//! A [`WorkerPool`] drains a bounded queue with a fixed number of tokio
//! workers; each request runs its [`TaskHandler`] on a blocking thread
//! under the request timeout. Responses flow back through one channel to
//! the [`ResponseRouter`], which hands each to the chain waiting on it.
//! [`ChainRunner`] is the async loop that connects an orchestrator to
//! the pool.

pub mod error;
pub mod gateway;
pub mod handler;
pub mod pool;
pub mod router;
pub mod runner;

pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use handler::{HandlerRegistry, TaskHandler};
pub use pool::{PoolHandle, WorkerPool};
pub use router::{DELIVERED_WINDOW, GATEWAY_SHUT_DOWN, ResponseRouter};
pub use runner::ChainRunner;
