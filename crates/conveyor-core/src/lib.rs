//! conveyor-core — shared contract types for the Conveyor control plane.
//!
//! Everything that crosses a crate boundary lives here: the worker-agent
//! wire contract (`RemoteTaskRequest` / `RemoteTaskResponse`), the unit
//! progress log, the terminal `StepResponse`, duration parsing, and the
//! `conveyor.toml` configuration.

pub mod config;
pub mod duration;
pub mod error;
pub mod progress;
pub mod response;
pub mod task;

pub use config::{ConveyorConfig, GatewayConfig, LoggingConfig, PaginationConfig, StateBackend, StateConfig};
pub use duration::{format_duration, parse_duration};
pub use error::{CoreError, CoreResult};
pub use progress::{SharedProgress, UnitProgress, UnitProgressLog, UnitStatus, now_millis};
pub use response::{FailureInfo, FailureType, GENERAL_ERROR, StepOutcome, StepResponse, StepStatus};
pub use task::{
    ExceptionKind, InvocationMode, PAYLOAD_VERSION, RemoteTaskRequest, RemoteTaskResponse, RequestId,
    TargetSelector, TaskError, TaskErrorKind, TaskException, TaskResult, TaskSpec,
};
