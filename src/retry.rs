//! Bounded exponential backoff for transient backend failures.

use std::fmt::Display;
use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;

/// The operation kept failing for every allowed attempt.
#[derive(Debug)]
pub(crate) struct RetryExhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Runs `op` under the policy, sleeping between attempts.
///
/// The delay doubles per attempt up to the policy cap; the final error is
/// returned together with the attempt count so callers can surface both.
pub(crate) async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryExhausted { attempts: attempt, error });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
