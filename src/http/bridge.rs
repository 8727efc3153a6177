//! Bridge between axum routes and the request registry.
//!
//! Every route added here runs its handler as a registered unit of work.
//! The axum handler future only waits for the response; if hyper drops it
//! (client disconnect, outer timeout) the drop guard asks the registry to
//! cancel the work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::RawPathParams,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter},
    Router,
};
use tracing::Instrument;

use crate::inflight::{
    BoxError, RegistryError, RequestKey, RequestRegistry, ResponseSink, RouteRequest,
};

/// Builds an axum [`Router`] whose routes run through a [`RequestRegistry`].
pub struct RouteBridge {
    router: Router,
    registry: RequestRegistry,
}

impl RouteBridge {
    pub fn new(registry: RequestRegistry) -> Self {
        Self {
            router: Router::new(),
            registry,
        }
    }

    /// Add a route served by `handler`.
    ///
    /// `path` uses axum syntax, e.g. `/users/{id}`. Adding a second method
    /// for an existing path merges the two.
    pub fn add_route<H, Fut, E>(mut self, filter: MethodFilter, path: &str, handler: H) -> Self
    where
        H: Fn(RouteRequest, ResponseSink) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let registry = self.registry.clone();
        let route: Arc<str> = Arc::from(path);

        let endpoint = move |params: RawPathParams,
                             method: Method,
                             uri: Uri,
                             headers: HeaderMap,
                             body: Bytes| {
            let registry = registry.clone();
            let handler = handler.clone();
            let route = Arc::clone(&route);
            async move {
                let params = params
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect::<HashMap<_, _>>();
                let request = RouteRequest::new(method, uri, headers, body).with_params(params);
                dispatch(registry, handler, &route, request).await
            }
        };

        self.router = self.router.route(path, on(filter, endpoint));
        self
    }

    pub fn get<H, Fut, E>(self, path: &str, handler: H) -> Self
    where
        H: Fn(RouteRequest, ResponseSink) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_route(MethodFilter::GET, path, handler)
    }

    pub fn post<H, Fut, E>(self, path: &str, handler: H) -> Self
    where
        H: Fn(RouteRequest, ResponseSink) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_route(MethodFilter::POST, path, handler)
    }

    pub fn put<H, Fut, E>(self, path: &str, handler: H) -> Self
    where
        H: Fn(RouteRequest, ResponseSink) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_route(MethodFilter::PUT, path, handler)
    }

    pub fn delete<H, Fut, E>(self, path: &str, handler: H) -> Self
    where
        H: Fn(RouteRequest, ResponseSink) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_route(MethodFilter::DELETE, path, handler)
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Register `request` and wait for its response.
async fn dispatch<H, Fut, E>(
    registry: RequestRegistry,
    handler: H,
    route: &str,
    request: RouteRequest,
) -> Response
where
    H: FnOnce(RouteRequest, ResponseSink) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let key = RequestKey::new();
    let span = tracing::info_span!(
        "route",
        request_key = %key,
        request_id = %request.request_id(),
        method = %request.method(),
        route = %route,
    );
    let (sink, receiver) = ResponseSink::channel();

    let registered = span.in_scope(|| registry.register(key, handler, request, sink));
    if let Err(err) = registered {
        match &err {
            RegistryError::Duplicate(_) => {
                tracing::error!(parent: &span, error = %err, "Request registry invariant violated");
            }
            RegistryError::ShuttingDown => {
                tracing::warn!(parent: &span, "Rejecting request during shutdown");
            }
        }
        return err.into_response();
    }

    let guard = CancelOnDrop::new(registry, key);
    let response = receiver.instrument(span).await;
    guard.disarm();

    match response {
        Ok(response) => response,
        // The client is still here but the work was cancelled server-side,
        // which only happens while shutting down.
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Cancels a registered request if the waiting transport future is dropped.
struct CancelOnDrop {
    registry: RequestRegistry,
    key: RequestKey,
    armed: bool,
}

impl CancelOnDrop {
    fn new(registry: RequestRegistry, key: RequestKey) -> Self {
        Self {
            registry,
            key,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed && self.registry.cancel(self.key) {
            tracing::debug!(request_key = %self.key, "Connection closed, cancelling request");
        }
    }
}
