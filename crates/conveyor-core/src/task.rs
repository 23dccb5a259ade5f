//! The worker-agent wire contract: one request out, one response back.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::progress::UnitProgress;

/// Payload encoding version stamped on every request.
pub const PAYLOAD_VERSION: u32 = 1;

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

/// Correlation id linking a response to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh id under `prefix` (usually the execution id).
    pub fn next(prefix: &str) -> Self {
        let n = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
        Self(format!("{prefix}:task-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which worker agents may pick up a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    /// Every tag must be advertised by the agent.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TargetSelector {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether an agent advertising `advertised` satisfies this selector.
    pub fn matches(&self, advertised: &[String]) -> bool {
        self.tags.iter().all(|t| advertised.contains(t))
    }
}

/// How the caller hands a request to the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationMode {
    /// Wait for queue space before the request counts as submitted.
    Sync,
    /// Submit or fail immediately; never wait on the queue.
    #[default]
    Async,
}

/// Description of work produced by a chain link, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub selector: TargetSelector,
    /// Falls back to the caller's default when unset.
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default)]
    pub mode: InvocationMode,
}

impl TaskSpec {
    pub fn new(task_type: &str, parameters: serde_json::Value) -> Self {
        Self {
            task_type: task_type.to_string(),
            parameters,
            selector: TargetSelector::any(),
            timeout: None,
            units: Vec::new(),
            mode: InvocationMode::Async,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.units = units.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_selector(mut self, selector: TargetSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_mode(mut self, mode: InvocationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Freeze into an immutable request.
    pub fn into_request(self, id: RequestId, default_timeout: Duration) -> RemoteTaskRequest {
        RemoteTaskRequest {
            id,
            task_type: self.task_type,
            payload_version: PAYLOAD_VERSION,
            parameters: self.parameters,
            selector: self.selector,
            timeout: self.timeout.unwrap_or(default_timeout),
            units: self.units,
            mode: self.mode,
        }
    }
}

/// A unit of work dispatched to a worker agent. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTaskRequest {
    id: RequestId,
    task_type: String,
    payload_version: u32,
    parameters: serde_json::Value,
    selector: TargetSelector,
    timeout: Duration,
    units: Vec<String>,
    mode: InvocationMode,
}

impl RemoteTaskRequest {
    /// Start describing a request; freeze it with [`TaskSpec::into_request`].
    pub fn builder(task_type: &str) -> TaskSpec {
        TaskSpec::new(task_type, serde_json::Value::Null)
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn payload_version(&self) -> u32 {
        self.payload_version
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }

    pub fn selector(&self) -> &TargetSelector {
        &self.selector
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn mode(&self) -> InvocationMode {
        self.mode
    }

    /// Decode the opaque parameters into a handler's own type.
    pub fn decode_parameters<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.parameters.clone())
    }
}

/// Category of a structured worker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorKind {
    NotFound,
    InvalidFormat,
    Command,
}

/// Structured failure reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why a request ended in an exception.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionKind {
    /// Worker crash, routing fault, unencodable result.
    #[default]
    Unexpected,
    TimedOut,
    /// External cancellation or gateway shutdown.
    Cancelled,
}

/// A terminal exception raised by a worker or the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskException {
    #[serde(default)]
    pub kind: ExceptionKind,
    pub message: String,
}

impl TaskException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome carried by a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskResult {
    /// Domain result, opaque to the orchestrator.
    Success(serde_json::Value),
    /// Known failure the step family interprets.
    Failure(TaskError),
    /// Terminal exception: worker crash, timeout, cancellation.
    Exception(TaskException),
}

impl TaskResult {
    /// An unexpected exception with `message`.
    pub fn exception(message: impl Into<String>) -> Self {
        TaskResult::Exception(TaskException::new(ExceptionKind::Unexpected, message))
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, TaskResult::Exception(_))
    }
}

/// A worker's answer to exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTaskResponse {
    pub request_id: RequestId,
    pub result: TaskResult,
    #[serde(default)]
    pub unit_progress: Vec<UnitProgress>,
}

impl RemoteTaskResponse {
    pub fn success(request_id: RequestId, value: serde_json::Value, units: Vec<UnitProgress>) -> Self {
        Self {
            request_id,
            result: TaskResult::Success(value),
            unit_progress: units,
        }
    }

    pub fn failure(request_id: RequestId, error: TaskError, units: Vec<UnitProgress>) -> Self {
        Self {
            request_id,
            result: TaskResult::Failure(error),
            unit_progress: units,
        }
    }

    /// A synthetic exception response for a gateway fault.
    pub fn exception(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            result: TaskResult::exception(message),
            unit_progress: Vec::new(),
        }
    }

    /// The worker gave up waiting; `units` is the last snapshot it saw.
    pub fn timed_out(request_id: RequestId, message: impl Into<String>, units: Vec<UnitProgress>) -> Self {
        Self {
            request_id,
            result: TaskResult::Exception(TaskException::new(ExceptionKind::TimedOut, message)),
            unit_progress: units,
        }
    }

    /// External cancellation of an outstanding request.
    pub fn cancelled(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            result: TaskResult::Exception(TaskException::new(ExceptionKind::Cancelled, message)),
            unit_progress: Vec::new(),
        }
    }

    /// Kind of the exception this response carries, if any.
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match &self.result {
            TaskResult::Exception(e) => Some(e.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_per_prefix() {
        let a = RequestId::next("exec-1");
        let b = RequestId::next("exec-1");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("exec-1:task-"));
    }

    #[test]
    fn spec_uses_default_timeout_when_unset() {
        let req = TaskSpec::new("NOOP", serde_json::json!({}))
            .with_units(["One"])
            .into_request(RequestId::new("r1"), Duration::from_secs(600));
        assert_eq!(req.timeout(), Duration::from_secs(600));
        assert_eq!(req.units(), ["One".to_string()]);
        assert_eq!(req.payload_version(), PAYLOAD_VERSION);
        assert_eq!(req.mode(), InvocationMode::Async);
    }

    #[test]
    fn builder_starts_with_null_parameters() {
        let req = RemoteTaskRequest::builder("NOOP")
            .with_parameters(serde_json::json!({"a": 1}))
            .into_request(RequestId::new("r2"), Duration::from_secs(1));
        assert_eq!(req.task_type(), "NOOP");
        assert_eq!(req.parameters()["a"], 1);
    }

    #[test]
    fn explicit_timeout_wins() {
        let req = TaskSpec::new("NOOP", serde_json::json!({}))
            .with_timeout(Duration::from_secs(5))
            .into_request(RequestId::new("r1"), Duration::from_secs(600));
        assert_eq!(req.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn selector_requires_every_tag() {
        let sel = TargetSelector::tagged(["aws", "us-east-1"]);
        assert!(sel.matches(&["aws".into(), "us-east-1".into(), "gpu".into()]));
        assert!(!sel.matches(&["aws".into()]));
        assert!(TargetSelector::any().matches(&[]));
    }

    #[test]
    fn synthetic_exceptions_carry_their_kind() {
        let id = RequestId::new("r3");
        assert_eq!(
            RemoteTaskResponse::exception(id.clone(), "lost").exception_kind(),
            Some(ExceptionKind::Unexpected)
        );
        assert_eq!(
            RemoteTaskResponse::cancelled(id.clone(), "stop").exception_kind(),
            Some(ExceptionKind::Cancelled)
        );
        let timed_out = RemoteTaskResponse::timed_out(id.clone(), "late", vec![UnitProgress::queued("A")]);
        assert_eq!(timed_out.exception_kind(), Some(ExceptionKind::TimedOut));
        assert_eq!(timed_out.unit_progress.len(), 1);
        assert_eq!(RemoteTaskResponse::success(id, serde_json::json!(1), vec![]).exception_kind(), None);
    }

    #[test]
    fn exception_kind_defaults_when_absent_on_the_wire() {
        let result: TaskResult = serde_json::from_str(r#"{"Exception":{"message":"worker lost"}}"#).unwrap();
        assert_eq!(result, TaskResult::exception("worker lost"));
    }

    #[test]
    fn response_survives_json() {
        let resp = RemoteTaskResponse::failure(
            RequestId::new("r9"),
            TaskError::new(TaskErrorKind::NotFound, "missing"),
            vec![],
        );
        let json = serde_json::to_string(&resp).unwrap();
        let back: RemoteTaskResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }
}
