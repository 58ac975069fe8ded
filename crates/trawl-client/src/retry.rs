//! Retry policy for API requests.
//!
//! Timeouts, connection failures and 5xx responses are retried with
//! exponential back-off (`backoff_base_ms * 2^attempt`, capped at 60 s) up to
//! `max_retries` additional attempts. A 429 is not counted against
//! `max_retries`: the `Retry-After` delay is honoured and the request issued
//! again, up to `max_rate_limit_waits` times. Everything else fails at once.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::ApiError;
use crate::rate_limit::{sleep_or_cancel, Endpoint};

const MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_rate_limit_waits: u32,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let computed = self
            .backoff_base_ms
            .saturating_mul(1u64 << retry.min(32));
        Duration::from_millis(computed.min(MAX_DELAY_MS))
    }
}

/// Runs `operation` under `policy`.
///
/// Returns [`ApiError::Exhausted`] with the last failure once either budget
/// is spent. Waits are interruptible by `cancel`.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    endpoint: Endpoint,
    cancel: Option<&watch::Receiver<bool>>,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempts = 0u32;
    let mut retries = 0u32;
    let mut rate_limit_waits = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let delay = if let ApiError::RateLimited {
            retry_after_secs, ..
        } = err
        {
            if rate_limit_waits >= policy.max_rate_limit_waits {
                return Err(exhausted(attempts, err));
            }
            rate_limit_waits += 1;
            let delay = Duration::from_secs(retry_after_secs);
            tracing::warn!(
                endpoint = %endpoint,
                waits = rate_limit_waits,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "client: 429 received, honouring Retry-After"
            );
            delay
        } else if err.is_retriable() {
            if retries >= policy.max_retries {
                tracing::error!(
                    endpoint = %endpoint,
                    attempts,
                    error = %err,
                    "client: retries exhausted"
                );
                return Err(exhausted(attempts, err));
            }
            let delay = policy.backoff_delay(retries);
            retries += 1;
            tracing::warn!(
                endpoint = %endpoint,
                attempt = retries,
                max_retries = policy.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "client: transient error, retrying after back-off"
            );
            delay
        } else {
            return Err(err);
        };

        sleep_or_cancel(delay, cancel).await?;
    }
}

fn exhausted(attempts: u32, last: ApiError) -> ApiError {
    ApiError::Exhausted {
        attempts,
        last: Box::new(last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 1_000,
            max_rate_limit_waits: 2,
        }
    }

    fn timeout() -> ApiError {
        ApiError::Timeout {
            endpoint: "search".to_owned(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(3);
        assert_eq!(p.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(p.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(p.backoff_delay(20), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_exhaust_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let start = Instant::now();
        let result = retry_with_backoff(&policy(3), Endpoint::Search, None, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(timeout())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(ApiError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, ApiError::Timeout { .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        // 1 + 2 + 4 seconds of back-off
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&policy(3), Endpoint::User, None, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::Client {
                    status: 404,
                    endpoint: "user".to_owned(),
                    body: String::new(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ApiError::Client { status: 404, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_do_not_consume_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let start = Instant::now();
        // max_retries = 0: only the 429 budget allows a second attempt.
        let result = retry_with_backoff(&policy(0), Endpoint::Search, None, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::RateLimited {
                        endpoint: "search".to_owned(),
                        retry_after_secs: 7,
                    })
                } else {
                    Ok(5)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_are_capped() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&policy(3), Endpoint::Search, None, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::RateLimited {
                    endpoint: "search".to_owned(),
                    retry_after_secs: 1,
                })
            }
        })
        .await;
        // two honoured waits, then give up on the third 429
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ApiError::Exhausted { attempts: 3, .. })));
    }
}
