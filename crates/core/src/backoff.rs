//! Retry loop for infrastructure calls (event log, task queue).
//!
//! Activity retries are decided by the executor from the activity's own policy;
//! this module only covers the plumbing around it, which must never drop work
//! because a store was briefly unreachable.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::activity::RetryPolicy;

pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Policy used for log and queue calls unless configured otherwise.
pub fn infrastructure_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_interval(Duration::from_millis(50))
        .with_maximum_interval(Duration::from_secs(2))
        .with_maximum_attempts(8)
}

pub async fn retry_transient<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && policy.allows_attempt_after(attempt) => {
                let delay = policy.interval_after(attempt);
                warn!(
                    event_name = "infra.retry",
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
