use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Run `task` under the policy timeout, retrying with exponential backoff.
///
/// Returns the last error once `max_retries` attempts have failed. A policy with
/// `max_retries == 0` still makes one attempt.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let attempts = policy.max_retries.max(1);
    let timeout_duration = policy.timeout();
    let mut last_error = Error::RetryTimeout(timeout_duration);

    for attempt in 1..=attempts {
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!(attempt, "task failed with error: {:?}", &e);
                last_error = e;
            }
            Err(_) => {
                warn!(attempt, "task timed out after {:?}", timeout_duration);
                last_error = Error::RetryTimeout(timeout_duration);
            }
        }

        if attempt < attempts {
            sleep(policy.delay_for(attempt)).await;
        }
    }

    warn!("task failed after {} attempts", attempts);
    Err(last_error)
}

/// Spawn a named background task whose failure is logged, never propagated.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
