//! Response sink and the one-shot finalization helper.
//!
//! A [`ResponseSink`] buffers status, headers and body until [`ResponseSink::end`]
//! hands the finished response to the transport. The transport side is a
//! oneshot sender, consumed on first use, so a response physically leaves the
//! process at most once no matter how many clones of the sink exist.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::inflight::execution::ExecutionOutcome;

/// Receiving half held by the transport.
pub type ResponseReceiver = oneshot::Receiver<Response<Body>>;

#[derive(Debug)]
struct SinkState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    transport: Option<oneshot::Sender<Response<Body>>>,
    sent: Option<StatusCode>,
    ended: bool,
    delivered: bool,
}

/// Handle a route handler writes its response through.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    state: Arc<Mutex<SinkState>>,
}

impl ResponseSink {
    /// Create a sink together with the receiver the transport awaits.
    pub fn channel() -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            state: Arc::new(Mutex::new(SinkState {
                status: None,
                headers: HeaderMap::new(),
                transport: Some(tx),
                sent: None,
                ended: false,
                delivered: false,
            })),
        };
        (sink, rx)
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the status code. Ignored once the response has ended.
    pub fn status(&self, status: StatusCode) -> &Self {
        let mut state = self.lock();
        if !state.ended {
            state.status = Some(status);
        }
        self
    }

    /// Set a response header. Ignored once the response has ended.
    pub fn header(&self, name: HeaderName, value: HeaderValue) -> &Self {
        let mut state = self.lock();
        if !state.ended {
            state.headers.insert(name, value);
        }
        self
    }

    /// Status written so far, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.lock().status
    }

    /// Status of the response this sink produced, if it produced one.
    ///
    /// Set by every sending path, including the implicit `200 OK`. A
    /// silently closed sink has none.
    pub fn sent_status(&self) -> Option<StatusCode> {
        self.lock().sent
    }

    /// Whether the response head has gone out to the transport.
    pub fn headers_sent(&self) -> bool {
        self.lock().delivered
    }

    /// Whether the response has been closed, with or without sending.
    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }

    /// Serialize `value` as the JSON body and end the response.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.finish(Bytes::from(body));
        Ok(())
    }

    /// Send a plain-text body and end the response.
    pub fn text(&self, body: impl Into<String>) {
        self.header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.finish(Bytes::from(body.into()));
    }

    /// Send `body` as-is and end the response.
    ///
    /// Returns `true` if this call ended the response.
    pub fn send(&self, body: impl Into<Bytes>) -> bool {
        self.finish(body.into())
    }

    /// End the response with an empty body.
    ///
    /// Returns `true` if this call ended the response.
    pub fn end(&self) -> bool {
        self.finish(Bytes::new())
    }

    fn finish(&self, body: Bytes) -> bool {
        let mut state = self.lock();
        if state.ended {
            return false;
        }
        state.ended = true;

        let status = state.status.unwrap_or(StatusCode::OK);
        state.status = Some(status);
        state.sent = Some(status);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = std::mem::take(&mut state.headers);

        if let Some(tx) = state.transport.take() {
            // A dropped receiver means the client is gone; nothing to deliver to.
            state.delivered = tx.send(response).is_ok();
        }
        true
    }

    /// Close the response without writing anything.
    ///
    /// Returns `true` if this call ended the response.
    pub fn close_silently(&self) -> bool {
        let mut state = self.lock();
        if state.ended {
            return false;
        }
        state.ended = true;
        state.transport.take();
        true
    }
}

/// Apply the terminal write for `outcome` to `sink`.
///
/// Unless the response already went out, success becomes `204 No Content`
/// and failure becomes `500 Internal Server Error`, whatever status the
/// handler staged. Staged headers are kept. A cancelled request is closed
/// without writing. Returns the status delivered by this call, if any.
pub fn finalize(sink: &ResponseSink, outcome: &ExecutionOutcome) -> Option<StatusCode> {
    if sink.is_ended() {
        return None;
    }

    let status = match outcome {
        ExecutionOutcome::Cancelled => {
            sink.close_silently();
            return None;
        }
        ExecutionOutcome::Success => StatusCode::NO_CONTENT,
        ExecutionOutcome::Failure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    sink.status(status);
    sink.end().then_some(status)
}
