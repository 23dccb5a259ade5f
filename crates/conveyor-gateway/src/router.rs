//! Response router: correlates worker responses with waiting chains.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use conveyor_core::{RemoteTaskResponse, RequestId};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};

/// Number of delivered ids remembered for duplicate detection.
pub const DELIVERED_WINDOW: usize = 4096;

/// Message delivered to every waiter still pending when the gateway stops.
pub const GATEWAY_SHUT_DOWN: &str = "gateway shut down";

struct Routes {
    pending: HashMap<RequestId, oneshot::Sender<RemoteTaskResponse>>,
    delivered: HashSet<RequestId>,
    /// Delivery order of `delivered`, oldest first.
    order: VecDeque<RequestId>,
    window: usize,
    closed: bool,
}

impl Routes {
    fn new(window: usize) -> Self {
        Self {
            pending: HashMap::new(),
            delivered: HashSet::new(),
            order: VecDeque::new(),
            window,
            closed: false,
        }
    }

    fn remember(&mut self, id: RequestId) {
        if self.window == 0 || !self.delivered.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.delivered.remove(&oldest);
            }
        }
    }
}

/// Routes each response to the one waiter registered for its request id.
#[derive(Clone)]
pub struct ResponseRouter {
    routes: Arc<Mutex<Routes>>,
}

impl Default for ResponseRouter {
    fn default() -> Self {
        Self::with_window(DELIVERED_WINDOW)
    }
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A router remembering the last `window` delivered ids.
    pub fn with_window(window: usize) -> Self {
        Self {
            routes: Arc::new(Mutex::new(Routes::new(window))),
        }
    }

    /// Register interest in the response to `id`.
    pub async fn register(&self, id: RequestId) -> GatewayResult<oneshot::Receiver<RemoteTaskResponse>> {
        let mut routes = self.routes.lock().await;
        if routes.closed {
            return Err(GatewayError::Closed);
        }
        if routes.pending.contains_key(&id) || routes.delivered.contains(&id) {
            return Err(GatewayError::AlreadyRegistered(id));
        }
        let (tx, rx) = oneshot::channel();
        routes.pending.insert(id, tx);
        Ok(rx)
    }

    /// Forget a registration whose request never made it to a worker.
    pub async fn cancel(&self, id: &RequestId) {
        self.routes.lock().await.pending.remove(id);
    }

    /// Route a response. Returns false when it was discarded.
    pub async fn deliver(&self, response: RemoteTaskResponse) -> bool {
        let mut routes = self.routes.lock().await;
        let id = response.request_id.clone();
        let Some(tx) = routes.pending.remove(&id) else {
            if routes.delivered.contains(&id) {
                warn!(request_id = %id, "discarding duplicate response");
            } else {
                warn!(request_id = %id, "discarding response for unknown request");
            }
            return false;
        };
        routes.remember(id.clone());
        if tx.send(response).is_err() {
            warn!(request_id = %id, "waiter dropped before response arrived");
            return false;
        }
        debug!(request_id = %id, "response routed");
        true
    }

    /// Close the router and answer every pending waiter with a
    /// cancellation carrying `message`. Later registrations fail.
    ///
    /// Returns the number of waiters answered.
    pub async fn fail_all(&self, message: &str) -> usize {
        let mut routes = self.routes.lock().await;
        routes.closed = true;
        let pending: Vec<_> = routes.pending.drain().collect();
        let mut answered = 0;
        for (id, tx) in pending {
            routes.remember(id.clone());
            if tx.send(RemoteTaskResponse::cancelled(id, message)).is_ok() {
                answered += 1;
            }
        }
        if answered > 0 {
            info!(answered, %message, "pending requests cancelled");
        }
        answered
    }

    pub async fn pending_count(&self) -> usize {
        self.routes.lock().await.pending.len()
    }

    pub async fn delivered_count(&self) -> usize {
        self.routes.lock().await.delivered.len()
    }

    /// Drain `responses` into this router until the channel closes or
    /// shutdown is signalled, then cancel whatever is still pending.
    pub fn spawn_dispatch(
        &self,
        mut responses: mpsc::Receiver<RemoteTaskResponse>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    response = responses.recv() => match response {
                        Some(response) => {
                            router.deliver(response).await;
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            router.fail_all(GATEWAY_SHUT_DOWN).await;
            debug!("response dispatch stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use conveyor_core::{ExceptionKind, TaskException, TaskResult};
    use serde_json::json;

    use super::*;

    fn ok(id: &str) -> RemoteTaskResponse {
        RemoteTaskResponse::success(RequestId::new(id), json!(id), vec![])
    }

    #[tokio::test]
    async fn routes_to_registered_waiter() {
        let router = ResponseRouter::new();
        let rx = router.register(RequestId::new("r1")).await.unwrap();
        assert!(router.deliver(ok("r1")).await);
        assert_eq!(rx.await.unwrap().request_id, RequestId::new("r1"));
        assert_eq!(router.pending_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_and_duplicate_are_discarded() {
        let router = ResponseRouter::new();
        assert!(!router.deliver(ok("stray")).await);

        let _rx = router.register(RequestId::new("r1")).await.unwrap();
        assert!(router.deliver(ok("r1")).await);
        assert!(!router.deliver(ok("r1")).await);
    }

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let router = ResponseRouter::new();
        let _rx = router.register(RequestId::new("r1")).await.unwrap();
        let err = router.register(RequestId::new("r1")).await.unwrap_err();
        assert_eq!(err, GatewayError::AlreadyRegistered(RequestId::new("r1")));
    }

    #[tokio::test]
    async fn delivered_ids_are_bounded_by_the_window() {
        let router = ResponseRouter::with_window(2);
        for id in ["r1", "r2", "r3"] {
            let _rx = router.register(RequestId::new(id)).await.unwrap();
            assert!(router.deliver(ok(id)).await);
        }
        assert_eq!(router.delivered_count().await, 2);

        // Inside the window a repeat is still a duplicate.
        assert!(!router.deliver(ok("r3")).await);
        let err = router.register(RequestId::new("r3")).await.unwrap_err();
        assert_eq!(err, GatewayError::AlreadyRegistered(RequestId::new("r3")));

        // The oldest id aged out.
        assert!(router.register(RequestId::new("r1")).await.is_ok());
    }

    #[tokio::test]
    async fn fail_all_answers_waiters_and_closes() {
        let router = ResponseRouter::new();
        let waiter = router.register(RequestId::new("r1")).await.unwrap();

        assert_eq!(router.fail_all(GATEWAY_SHUT_DOWN).await, 1);
        let resp = waiter.await.unwrap();
        assert_eq!(resp.exception_kind(), Some(ExceptionKind::Cancelled));
        assert_eq!(router.pending_count().await, 0);

        let err = router.register(RequestId::new("r2")).await.unwrap_err();
        assert_eq!(err, GatewayError::Closed);
        // A late worker answer is a duplicate now.
        assert!(!router.deliver(ok("r1")).await);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_waiters() {
        let router = ResponseRouter::new();
        let (_tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = router.spawn_dispatch(rx, shutdown_rx);

        let waiter = router.register(RequestId::new("r1")).await.unwrap();
        shutdown_tx.send(true).unwrap();
        let resp = waiter.await.unwrap();
        assert_eq!(
            resp.result,
            TaskResult::Exception(TaskException::new(ExceptionKind::Cancelled, GATEWAY_SHUT_DOWN))
        );
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_loop_drains_channel() {
        let router = ResponseRouter::new();
        let (tx, rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = router.spawn_dispatch(rx, shutdown_rx);

        let waiter = router.register(RequestId::new("r1")).await.unwrap();
        tx.send(ok("r1")).await.unwrap();
        assert_eq!(waiter.await.unwrap().result, TaskResult::Success(json!("r1")));

        drop(tx);
        handle.await.unwrap();
    }
}
