//! Registry of in-flight request executions.
//!
//! Each registered request runs as its own task on the registry's
//! [`TaskTracker`]. The entry holds the request's cancellation token so a
//! transport close can reach the running work. Finalization happens only
//! inside that task, after the work has stopped, so a close racing a
//! completion can never finalize twice: `cancel` asks, the task decides.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::inflight::execution::{execute, BoxError, ExecutionOutcome};
use crate::inflight::request::{RequestKey, RouteRequest};
use crate::inflight::response::{finalize, ResponseSink};
use crate::observability::metrics;

/// Errors returned by [`RequestRegistry::register`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The key is already in flight. The existing entry is left untouched.
    #[error("request {0} is already registered")]
    Duplicate(RequestKey),

    /// The registry has been shut down and accepts no new work.
    #[error("registry is shutting down")]
    ShuttingDown,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        match self {
            Self::Duplicate(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        }
    }
}

/// Bookkeeping for one in-flight request.
#[derive(Debug)]
pub struct PendingRequest {
    token: CancellationToken,
    response: ResponseSink,
    method: Method,
    path: String,
    request_id: String,
    started: Instant,
}

/// Point-in-time view of one in-flight request.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSnapshot {
    pub key: u64,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub age_ms: u64,
    pub cancel_requested: bool,
    pub responded: bool,
}

/// Outcome counters since the registry was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub in_flight: u64,
}

impl RegistryStats {
    /// Requests that reached finalization.
    pub fn finalized(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled
    }
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Request context kept for the completion path.
struct RequestMeta {
    method: Method,
    path: String,
    headers: HeaderMap,
    request_id: String,
    started: Instant,
}

#[derive(Debug)]
struct Inner {
    entries: DashMap<RequestKey, PendingRequest>,
    tracker: TaskTracker,
    root: CancellationToken,
    counters: Counters,
}

/// Concurrent registry of in-flight requests.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Debug, Clone)]
pub struct RequestRegistry {
    inner: Arc<Inner>,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                tracker: TaskTracker::new(),
                root: CancellationToken::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Start `handler` for `request` as an independent task.
    ///
    /// Returns as soon as the task is scheduled. The handler's future is built
    /// before the entry is inserted, so a handler that panics while building
    /// it leaves nothing behind. The entry is inserted before the task is
    /// spawned, so completion always finds it.
    pub fn register<H, Fut, E>(
        &self,
        key: RequestKey,
        handler: H,
        mut request: RouteRequest,
        response: ResponseSink,
    ) -> Result<(), RegistryError>
    where
        H: FnOnce(RouteRequest, ResponseSink) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        if self.inner.tracker.is_closed() {
            return Err(RegistryError::ShuttingDown);
        }

        let token = self.inner.root.child_token();
        let meta = RequestMeta {
            method: request.method().clone(),
            path: request.path().to_string(),
            headers: request.headers().clone(),
            request_id: request.request_id().to_string(),
            started: Instant::now(),
        };

        request.cancellation = token.clone();
        let work = handler(request, response.clone());

        match self.inner.entries.entry(key) {
            Entry::Occupied(_) => return Err(RegistryError::Duplicate(key)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    token: token.clone(),
                    response: response.clone(),
                    method: meta.method.clone(),
                    path: meta.path.clone(),
                    request_id: meta.request_id.clone(),
                    started: meta.started,
                });
            }
        }

        self.inner.counters.registered.fetch_add(1, Ordering::Relaxed);
        metrics::record_in_flight(self.inner.entries.len());

        let registry = self.clone();

        self.inner.tracker.spawn(
            async move {
                let outcome = execute(work, &token).await;
                registry.complete(key, &meta, &response, outcome);
            }
            .instrument(tracing::Span::current()),
        );

        Ok(())
    }

    /// Finalize a finished unit of work. Runs exactly once per registration.
    fn complete(
        &self,
        key: RequestKey,
        meta: &RequestMeta,
        response: &ResponseSink,
        outcome: ExecutionOutcome,
    ) {
        finalize(response, &outcome);

        match &outcome {
            ExecutionOutcome::Success => {
                self.inner.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    request_key = %key,
                    request_id = %meta.request_id,
                    "Request completed"
                );
            }
            ExecutionOutcome::Failure(cause) => {
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    request_key = %key,
                    request_id = %meta.request_id,
                    method = %meta.method,
                    path = %meta.path,
                    headers = ?meta.headers,
                    cause = %cause,
                    "Unhandled error in route"
                );
            }
            ExecutionOutcome::Cancelled => {
                self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    request_key = %key,
                    request_id = %meta.request_id,
                    "Request cancelled before completion"
                );
            }
        }

        metrics::record_outcome(outcome.label());
        if let Some(status) = response.sent_status() {
            metrics::record_request(meta.method.as_str(), status.as_u16(), meta.started);
        }

        self.remove(key);
    }

    /// Drop the entry for `key`. Safe to call for unknown keys.
    fn remove(&self, key: RequestKey) -> bool {
        let removed = self.inner.entries.remove(&key).is_some();
        if removed {
            metrics::record_in_flight(self.inner.entries.len());
        }
        removed
    }

    /// Ask the work for `key` to stop.
    ///
    /// Does not wait and does not finalize; the request's own task does that
    /// once the work actually stops. Returns `false` if `key` is not in flight.
    pub fn cancel(&self, key: RequestKey) -> bool {
        let token = match self.inner.entries.get(&key) {
            Some(entry) => entry.token.clone(),
            None => return false,
        };
        token.cancel();
        true
    }

    /// Stop accepting work, cancel everything in flight and wait for every
    /// task to finish finalizing.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        let in_flight = self.inner.entries.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Cancelling in-flight requests");
        }
        self.inner.root.cancel();
        self.inner.tracker.wait().await;
    }

    pub fn contains(&self, key: RequestKey) -> bool {
        self.inner.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Snapshot every in-flight request.
    pub fn snapshot(&self) -> Vec<PendingSnapshot> {
        let mut pending: Vec<PendingSnapshot> = self
            .inner
            .entries
            .iter()
            .map(|entry| {
                let pending = entry.value();
                PendingSnapshot {
                    key: entry.key().as_u64(),
                    request_id: pending.request_id.clone(),
                    method: pending.method.to_string(),
                    path: pending.path.clone(),
                    age_ms: u64::try_from(pending.started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    cancel_requested: pending.token.is_cancelled(),
                    responded: pending.response.is_ended(),
                }
            })
            .collect();
        pending.sort_by_key(|p| p.key);
        pending
    }

    pub fn stats(&self) -> RegistryStats {
        let counters = &self.inner.counters;
        RegistryStats {
            registered: counters.registered.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            in_flight: self.inner.entries.len() as u64,
        }
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
