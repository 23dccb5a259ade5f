//! Worker pool: bounded submission queue drained by a fixed set of workers.
//!
//! Each request runs its handler on a blocking thread under the request's
//! timeout. Every submitted request produces exactly one response on the
//! response channel: the handler's result, or a synthetic exception for a
//! timeout, a panic, or an unroutable task type.
//!
//! A timed-out handler cannot be stopped. Its worker answers with the
//! progress frozen at expiry, then keeps its slot until the handler
//! returns, so at most `workers` handlers ever run at once.

use std::sync::Arc;

use conveyor_core::{
    GatewayConfig, InvocationMode, RemoteTaskRequest, RemoteTaskResponse, RequestId, SharedProgress, TaskResult,
    format_duration,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::handler::HandlerRegistry;

/// Cloneable submission side of a [`WorkerPool`].
#[derive(Clone)]
pub struct PoolHandle {
    submit_tx: mpsc::Sender<RemoteTaskRequest>,
    responses: mpsc::Sender<RemoteTaskResponse>,
}

impl PoolHandle {
    /// Enqueue a request without waiting for queue space.
    pub fn submit(&self, request: RemoteTaskRequest) -> GatewayResult<()> {
        let id = request.id().clone();
        let task_type = request.task_type().to_string();
        self.submit_tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(rejected) => GatewayError::QueueFull(rejected.id().clone()),
            mpsc::error::TrySendError::Closed(_) => GatewayError::Closed,
        })?;
        debug!(request_id = %id, %task_type, "task submitted");
        Ok(())
    }

    /// Enqueue a request, waiting for queue space. Fails only once the
    /// pool has stopped.
    pub async fn submit_wait(&self, request: RemoteTaskRequest) -> GatewayResult<()> {
        let id = request.id().clone();
        self.submit_tx.send(request).await.map_err(|_| GatewayError::Closed)?;
        debug!(request_id = %id, "task submitted after waiting for queue space");
        Ok(())
    }

    /// Submit according to the request's invocation mode.
    pub async fn dispatch(&self, request: RemoteTaskRequest) -> GatewayResult<()> {
        match request.mode() {
            InvocationMode::Async => self.submit(request),
            InvocationMode::Sync => self.submit_wait(request).await,
        }
    }

    /// Deliver a synthetic cancellation for `request_id` (external cancellation).
    pub fn inject_failure(&self, request_id: RequestId, message: &str) -> GatewayResult<()> {
        info!(%request_id, %message, "injecting task failure");
        self.responses
            .try_send(RemoteTaskResponse::cancelled(request_id, message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(rejected) => GatewayError::QueueFull(rejected.request_id),
                mpsc::error::TrySendError::Closed(_) => GatewayError::Closed,
            })
    }
}

/// A fixed set of workers sharing one bounded queue.
pub struct WorkerPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers on the current runtime.
    pub fn spawn(
        config: &GatewayConfig,
        registry: Arc<HandlerRegistry>,
        responses: mpsc::Sender<RemoteTaskResponse>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (submit_tx, submit_rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(submit_rx));

        let workers = (0..config.workers.max(1))
            .map(|index| {
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let responses = responses.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    run_worker(index, queue, registry, responses, shutdown).await;
                })
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            task_types = ?registry.task_types(),
            "worker pool started"
        );

        Self {
            handle: PoolHandle {
                submit_tx,
                responses,
            },
            workers,
        }
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn submit(&self, request: RemoteTaskRequest) -> GatewayResult<()> {
        self.handle.submit(request)
    }

    pub fn inject_failure(&self, request_id: RequestId, message: &str) -> GatewayResult<()> {
        self.handle.inject_failure(request_id, message)
    }

    /// Wait for every worker to exit. Workers stop once shutdown is
    /// signalled, or once every submission handle has been dropped.
    pub async fn join(self) {
        drop(self.handle);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("worker pool stopped");
    }
}

async fn run_worker(
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<RemoteTaskRequest>>>,
    registry: Arc<HandlerRegistry>,
    responses: mpsc::Sender<RemoteTaskResponse>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = index, "worker starting");

    loop {
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                request = rx.recv() => request,
                _ = shutdown.changed() => None,
            }
        };
        let Some(request) = next else {
            debug!(worker = index, "worker shutting down");
            break;
        };

        let (response, straggler) = execute(&registry, request).await;
        if responses.send(response).await.is_err() {
            warn!(worker = index, "response channel closed, worker exiting");
            break;
        }

        if let Some(straggler) = straggler {
            warn!(worker = index, "slot held until the timed-out handler returns");
            tokio::select! {
                joined = straggler => match joined {
                    Ok(_) => debug!(worker = index, "timed-out handler returned"),
                    Err(e) => error!(worker = index, error = %e, "timed-out handler panicked"),
                },
                _ = shutdown.changed() => {
                    debug!(worker = index, "worker shutting down");
                    break;
                }
            }
        }
    }
}

/// A handler still running after its request timed out.
type Straggler = JoinHandle<TaskResult>;

async fn execute(registry: &HandlerRegistry, request: RemoteTaskRequest) -> (RemoteTaskResponse, Option<Straggler>) {
    let id = request.id().clone();
    let handler = match registry.resolve(&request) {
        Ok(handler) => handler,
        Err(e) => {
            error!(request_id = %id, error = %e, "cannot route task");
            return (RemoteTaskResponse::exception(id, e.to_string()), None);
        }
    };

    let timeout = request.timeout();
    let task_type = request.task_type().to_string();
    let progress = SharedProgress::with_units(request.units());
    let handler_progress = progress.clone();
    let mut task = tokio::task::spawn_blocking(move || handler.execute(&request, &handler_progress));

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => {
            if let TaskResult::Failure(e) = &result {
                error!(request_id = %id, %task_type, error = %e, "task handler reported failure");
            }
            let response = RemoteTaskResponse {
                request_id: id,
                result,
                unit_progress: progress.freeze().into_entries(),
            };
            (response, None)
        }
        Ok(Err(join_err)) => {
            error!(request_id = %id, %task_type, error = %join_err, "task handler panicked");
            let response = RemoteTaskResponse {
                request_id: id,
                result: TaskResult::exception(format!("task handler panicked: {join_err}")),
                unit_progress: progress.freeze().into_entries(),
            };
            (response, None)
        }
        Err(_) => {
            let after = format_duration(timeout);
            error!(request_id = %id, %task_type, timeout = %after, "task timed out");
            let snapshot = progress.freeze();
            let response =
                RemoteTaskResponse::timed_out(id, format!("task timed out after {after}"), snapshot.into_entries());
            (response, Some(task))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    use conveyor_core::{ExceptionKind, TaskSpec, UnitStatus};
    use serde_json::json;

    use super::*;
    use crate::handler::TaskHandler;

    struct Echo;

    impl TaskHandler for Echo {
        fn task_type(&self) -> &str {
            "ECHO"
        }

        fn execute(&self, request: &RemoteTaskRequest, progress: &SharedProgress) -> TaskResult {
            for unit in request.units() {
                progress.succeed(unit, None).unwrap();
            }
            TaskResult::Success(request.parameters().clone())
        }
    }

    /// Starts its unit, sleeps, then tries to finish it.
    struct Sleepy(Duration);

    impl TaskHandler for Sleepy {
        fn task_type(&self) -> &str {
            "SLEEP"
        }

        fn execute(&self, request: &RemoteTaskRequest, progress: &SharedProgress) -> TaskResult {
            for unit in request.units() {
                let _ = progress.start(unit);
            }
            std::thread::sleep(self.0);
            for unit in request.units() {
                let _ = progress.succeed(unit, None);
            }
            TaskResult::Success(json!(null))
        }
    }

    struct Panicky;

    impl TaskHandler for Panicky {
        fn task_type(&self) -> &str {
            "PANIC"
        }

        fn execute(&self, _request: &RemoteTaskRequest, _progress: &SharedProgress) -> TaskResult {
            panic!("handler exploded");
        }
    }

    /// Signals when it starts, then blocks until released.
    struct Gated {
        started: StdMutex<std_mpsc::Sender<()>>,
        release: StdMutex<std_mpsc::Receiver<()>>,
    }

    impl TaskHandler for Gated {
        fn task_type(&self) -> &str {
            "GATED"
        }

        fn execute(&self, _request: &RemoteTaskRequest, _progress: &SharedProgress) -> TaskResult {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            TaskResult::Success(json!(null))
        }
    }

    fn config(workers: usize, queue_capacity: usize) -> GatewayConfig {
        GatewayConfig {
            workers,
            queue_capacity,
            ..GatewayConfig::default()
        }
    }

    fn request(task_type: &str, id: &str, timeout: Duration) -> RemoteTaskRequest {
        TaskSpec::new(task_type, json!({"id": id}))
            .with_units(["Only"])
            .into_request(RequestId::new(id), timeout)
    }

    fn spawn(
        config: GatewayConfig,
        registry: HandlerRegistry,
    ) -> (WorkerPool, mpsc::Receiver<RemoteTaskResponse>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::spawn(&config, Arc::new(registry), tx, shutdown_rx);
        (pool, rx, shutdown_tx)
    }

    #[tokio::test]
    async fn executes_and_reports_progress() {
        let registry = HandlerRegistry::default().with(Arc::new(Echo));
        let (pool, mut rx, _shutdown) = spawn(config(2, 4), registry);

        pool.submit(request("ECHO", "r1", Duration::from_secs(5))).unwrap();
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.request_id, RequestId::new("r1"));
        assert_eq!(resp.result, TaskResult::Success(json!({"id": "r1"})));
        assert_eq!(resp.unit_progress.len(), 1);
        assert!(resp.unit_progress[0].status.is_terminal());
    }

    #[tokio::test]
    async fn timeout_becomes_exception_with_frozen_progress() {
        let registry = HandlerRegistry::default().with(Arc::new(Sleepy(Duration::from_millis(300))));
        let (pool, mut rx, _shutdown) = spawn(config(1, 4), registry);

        pool.submit(request("SLEEP", "r1", Duration::from_millis(20))).unwrap();
        let resp = rx.recv().await.unwrap();
        match &resp.result {
            TaskResult::Exception(e) => {
                assert_eq!(e.kind, ExceptionKind::TimedOut);
                assert!(e.message.contains("timed out"), "{}", e.message);
            }
            other => panic!("expected exception, got {other:?}"),
        }
        // The snapshot at expiry, not an empty list.
        assert_eq!(resp.unit_progress.len(), 1);
        assert_eq!(resp.unit_progress[0].status, UnitStatus::Running);
    }

    #[tokio::test]
    async fn timed_out_handler_keeps_its_slot() {
        let registry = HandlerRegistry::default()
            .with(Arc::new(Sleepy(Duration::from_millis(300))))
            .with(Arc::new(Echo));
        let (pool, mut rx, _shutdown) = spawn(config(1, 4), registry);
        let started = Instant::now();

        pool.submit(request("SLEEP", "r1", Duration::from_millis(20))).unwrap();
        pool.submit(request("ECHO", "r2", Duration::from_secs(5))).unwrap();

        assert_eq!(rx.recv().await.unwrap().request_id, RequestId::new("r1"));
        let echoed = rx.recv().await.unwrap();
        assert_eq!(echoed.request_id, RequestId::new("r2"));
        assert!(started.elapsed() >= Duration::from_millis(250), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn panic_becomes_exception() {
        let registry = HandlerRegistry::default().with(Arc::new(Panicky));
        let (pool, mut rx, _shutdown) = spawn(config(1, 4), registry);

        pool.submit(request("PANIC", "r1", Duration::from_secs(5))).unwrap();
        let resp = rx.recv().await.unwrap();
        assert!(resp.result.is_exception());

        // The worker survives and keeps draining the queue.
        pool.submit(request("PANIC", "r2", Duration::from_secs(5))).unwrap();
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.request_id, RequestId::new("r2"));
    }

    #[tokio::test]
    async fn unknown_task_type_becomes_exception() {
        let (pool, mut rx, _shutdown) = spawn(config(1, 4), HandlerRegistry::default());
        pool.submit(request("MYSTERY", "r1", Duration::from_secs(5))).unwrap();
        let resp = rx.recv().await.unwrap();
        match resp.result {
            TaskResult::Exception(e) => assert!(e.message.contains("MYSTERY")),
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let gated = Gated {
            started: StdMutex::new(started_tx),
            release: StdMutex::new(release_rx),
        };
        let registry = HandlerRegistry::default().with(Arc::new(gated));
        let (pool, mut rx, _shutdown) = spawn(config(1, 1), registry);

        pool.submit(request("GATED", "r1", Duration::from_secs(5))).unwrap();
        tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
            .await
            .unwrap();

        pool.submit(request("GATED", "r2", Duration::from_secs(5))).unwrap();
        let err = pool
            .submit(request("GATED", "r3", Duration::from_secs(5)))
            .unwrap_err();
        assert_eq!(err, GatewayError::QueueFull(RequestId::new("r3")));

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        assert_eq!(rx.recv().await.unwrap().request_id, RequestId::new("r1"));
        assert_eq!(rx.recv().await.unwrap().request_id, RequestId::new("r2"));
    }

    #[tokio::test]
    async fn injected_failure_is_delivered() {
        let (pool, mut rx, _shutdown) = spawn(config(1, 4), HandlerRegistry::default());
        pool.inject_failure(RequestId::new("r9"), "cancelled by operator").unwrap();
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.request_id, RequestId::new("r9"));
        assert_eq!(resp.exception_kind(), Some(ExceptionKind::Cancelled));
    }

    #[tokio::test]
    async fn sync_requests_wait_for_queue_space() {
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let gated = Gated {
            started: StdMutex::new(started_tx),
            release: StdMutex::new(release_rx),
        };
        let registry = HandlerRegistry::default().with(Arc::new(gated));
        let (pool, mut rx, _shutdown) = spawn(config(1, 1), registry);

        pool.submit(request("GATED", "r1", Duration::from_secs(5))).unwrap();
        tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
            .await
            .unwrap();
        pool.submit(request("GATED", "r2", Duration::from_secs(5))).unwrap();

        let sync = TaskSpec::new("GATED", json!({}))
            .with_mode(InvocationMode::Sync)
            .into_request(RequestId::new("r3"), Duration::from_secs(5));
        let handle = pool.handle();
        let waiting = tokio::spawn(async move { handle.dispatch(sync).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        waiting.await.unwrap().unwrap();
        for id in ["r1", "r2", "r3"] {
            assert_eq!(rx.recv().await.unwrap().request_id, RequestId::new(id));
        }
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_closed() {
        let registry = HandlerRegistry::default().with(Arc::new(Echo));
        let (pool, _rx, shutdown) = spawn(config(2, 4), registry);
        let handle = pool.handle();

        shutdown.send(true).unwrap();
        pool.join().await;

        let err = handle
            .submit(request("ECHO", "r1", Duration::from_secs(5)))
            .unwrap_err();
        assert_eq!(err, GatewayError::Closed);
    }
}
