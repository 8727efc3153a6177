//! Request identity and the request view handed to route handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::http::X_REQUEST_ID;

/// Relaxed ordering is enough: keys only need to be unique.
static REQUEST_KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one registered request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey(u64);

impl RequestKey {
    /// Generate a new unique key.
    pub fn new() -> Self {
        Self(REQUEST_KEY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw key value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for RequestKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// An inbound request as seen by a route handler.
///
/// The body is fully buffered before the handler runs. The cancellation token
/// is replaced by the registry on registration; handlers doing long blocking
/// work should poll it between steps.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    params: HashMap<String, String>,
    body: Bytes,
    pub(crate) cancellation: CancellationToken,
}

impl RouteRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            params: HashMap::new(),
            body,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach the path parameters captured by the router.
    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Look up a captured path parameter, e.g. `id` for `/users/{id}`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// The `x-request-id` assigned at the edge, or `"unknown"`.
    pub fn request_id(&self) -> &str {
        self.headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }

    /// Token signalled when the client goes away or the server shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_key_unique() {
        let k1 = RequestKey::new();
        let k2 = RequestKey::new();
        assert_ne!(k1, k2);
        assert!(k2.as_u64() > k1.as_u64());
    }

    #[test]
    fn request_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        let mut params = HashMap::new();
        params.insert("id".to_string(), "7".to_string());

        let req = RouteRequest::new(
            Method::PUT,
            Uri::from_static("/users/7?verbose=1"),
            headers,
            Bytes::from_static(br#"{"name":"Ada"}"#),
        )
        .with_params(params);

        assert_eq!(req.path(), "/users/7");
        assert_eq!(req.param("id"), Some("7"));
        assert_eq!(req.param("missing"), None);
        assert_eq!(req.request_id(), "abc-123");

        let body: serde_json::Value = req.json().unwrap();
        assert_eq!(body["name"], "Ada");
    }

    #[test]
    fn request_id_defaults_to_unknown() {
        let req = RouteRequest::new(Method::GET, Uri::from_static("/"), HeaderMap::new(), Bytes::new());
        assert_eq!(req.request_id(), "unknown");
        assert!(!req.is_cancelled());
    }
}
