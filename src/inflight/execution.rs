//! Single-request execution wrapper.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

/// Error type route handlers fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How a unit of work ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The handler returned `Ok`.
    Success,
    /// The handler returned an error or panicked.
    Failure(BoxError),
    /// The work was interrupted before it finished.
    Cancelled,
}

impl ExecutionOutcome {
    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(_) => "failure",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Drive `work` until it completes or `token` fires.
///
/// Cancellation wins ties, so work that bails out because it saw the token
/// is reported as `Cancelled` rather than as a failure.
pub async fn execute<Fut, E>(work: Fut, token: &CancellationToken) -> ExecutionOutcome
where
    Fut: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    let guarded = AssertUnwindSafe(work).catch_unwind();

    tokio::select! {
        biased;
        _ = token.cancelled() => ExecutionOutcome::Cancelled,
        result = guarded => match result {
            Ok(Ok(())) => ExecutionOutcome::Success,
            Ok(Err(err)) => ExecutionOutcome::Failure(err.into()),
            Err(panic) => ExecutionOutcome::Failure(panic_message(panic).into()),
        },
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}
