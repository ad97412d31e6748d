//! Deadline race around blocking engine calls.
//!
//! The engine call runs on the blocking pool and is raced against a timer.
//! When the timer wins the join handle is dropped: the call keeps running
//! detached and its result is discarded.

use std::time::{Duration, Instant};

use super::{InferenceError, InferenceRequest, SessionLease};

/// Outcome of a bounded blocking call.
#[derive(Debug)]
pub enum Bounded<T> {
    Completed(T),
    TimedOut,
    /// The blocking task panicked or was cancelled.
    Aborted(String),
}

/// Run `f` on the blocking pool, giving up after `deadline`.
pub async fn run_bounded<T, F>(deadline: Duration, f: F) -> Bounded<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    tokio::select! {
        joined = handle => match joined {
            Ok(value) => Bounded::Completed(value),
            Err(e) => Bounded::Aborted(e.to_string()),
        },
        _ = tokio::time::sleep(deadline) => Bounded::TimedOut,
    }
}

/// Execute one generation on a leased session within `deadline`.
///
/// Invalidating errors mark the session unhealthy so the pool rebuilds it
/// on the next acquire.
pub async fn invoke(
    lease: &SessionLease,
    request: InferenceRequest,
    deadline: Duration,
) -> Result<String, InferenceError> {
    let stage = request.stage;
    let engine = lease.engine();
    let handle = lease.handle().clone();
    let start = Instant::now();

    let outcome = run_bounded(deadline, move || engine.generate(&handle, &request)).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let result = match outcome {
        Bounded::Completed(result) => result,
        Bounded::TimedOut => Err(InferenceError::Timeout {
            stage,
            deadline_ms: deadline.as_millis() as u64,
        }),
        Bounded::Aborted(reason) => Err(InferenceError::Aborted(reason)),
    };

    match &result {
        Ok(text) => {
            tracing::debug!(%stage, elapsed_ms, chars = text.len(), "Inference completed");
        }
        Err(e) => {
            if e.invalidates_session() {
                lease.mark_unhealthy();
            }
            tracing::warn!(%stage, elapsed_ms, error = %e, "Inference failed");
        }
    }
    result
}
