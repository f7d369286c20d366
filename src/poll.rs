//! Poll-until-predicate-or-timeout.
//!
//! The controlled viewer offers no completion callbacks; every wait in this
//! crate (arrival confirmation, overlay clearance, element presence, cookie
//! arrival, total-count discovery) is a bounded poll against externally
//! observable state.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a poll loop stopped without producing a value.
#[derive(Debug)]
pub enum PollError<E> {
    /// The deadline passed without the predicate succeeding.
    TimedOut,
    /// The cancellation token fired.
    Cancelled,
    /// The predicate returned a hard error.
    Failed(E),
}

/// Repeatedly evaluate `check` every `interval` until it yields a value, the
/// overall `timeout` elapses, or `cancel` fires.
///
/// `check` returns `Ok(Some(v))` on success, `Ok(None)` to keep polling, and
/// `Err(e)` to abort immediately. The predicate is always evaluated at least
/// once, even with a zero timeout.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => return Err(PollError::Failed(e)),
        }
        if Instant::now() >= deadline {
            return Err(PollError::TimedOut);
        }
        tokio::time::sleep(interval).await;
    }
}
