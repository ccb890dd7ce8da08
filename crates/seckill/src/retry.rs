//! Deadline and retry helpers
//!
//! Every adapter call on the request path runs under an explicit deadline;
//! exceeding it is reported as `Timeout` and treated like a store failure.
//! Event emission retries with a quadratic backoff that cancellation
//! short-circuits.

use crate::error::{Result, SeckillError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Deadline for lease acquisition
pub const LEASE_ACQUIRE_DEADLINE: Duration = Duration::from_secs(3);
/// Deadline for counter store script invocations
pub const SCRIPT_DEADLINE: Duration = Duration::from_secs(2);
/// Deadline for durable transactions
pub const TXN_DEADLINE: Duration = Duration::from_secs(5);

/// Run an adapter call under a deadline, folding the adapter's error into the
/// engine taxonomy.
pub async fn with_deadline<T, E, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    SeckillError: From<E>,
{
    match timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(SeckillError::Timeout(deadline)),
    }
}

/// Retry an operation with delays of i² seconds before attempt i.
///
/// The first attempt runs immediately; with three attempts the waits are one
/// and four seconds. Cancellation during a wait returns the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    cancel: &CancellationToken,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts.max(1) {
                    return Err(e);
                }
                let delay = Duration::from_secs(u64::from(attempt * attempt));
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}
