//! Bounded, cancellable waiting.
//!
//! Every "wait until X shows up" in a run goes through [`poll_until`] so
//! that nothing can block forever: each wait has an explicit timeout and
//! observes the run's [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Cancelled,
}

/// Sleep for `duration` unless the token is cancelled first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), WaitError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Call `check` every `interval` until it yields a value, `timeout` elapses,
/// or `cancel` fires.
///
/// `check` always runs at least once, even with a zero timeout.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if let Some(value) = check().await {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Timeout);
        }
        sleep_or_cancel(interval.min(deadline - now), cancel).await?;
    }
}
