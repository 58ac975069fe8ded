//! Per-endpoint rate-limit bookkeeping and the pre-request gate.
//!
//! Each response's `X-Rate-Limit-*` headers overwrite the stored state for
//! its endpoint family. Before a request, [`RateLimiter::wait_for_capacity`]
//! sleeps until `reset_at + margin` when the family has no requests left.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ApiError;

const LIMIT_HEADER: &str = "x-rate-limit-limit";
const REMAINING_HEADER: &str = "x-rate-limit-remaining";
const RESET_HEADER: &str = "x-rate-limit-reset";

/// Endpoint families that share a rate-limit budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Search,
    User,
    Tweets,
}

impl Endpoint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Search => "search",
            Endpoint::User => "user",
            Endpoint::Tweets => "tweets",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<Instant>,
}

impl RateLimitState {
    /// How long a request issued at `now` must wait, if at all.
    fn wait_needed(&self, now: Instant, margin: Duration) -> Option<Duration> {
        let exhausted = self.remaining.is_some_and(|r| r == 0);
        match self.reset_at {
            Some(reset_at) if exhausted && now < reset_at => {
                Some(reset_at.duration_since(now) + margin)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    states: Mutex<HashMap<Endpoint, RateLimitState>>,
    margin: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(margin: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            margin,
        }
    }

    #[must_use]
    pub fn state(&self, endpoint: Endpoint) -> Option<RateLimitState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint)
            .copied()
    }

    /// Overwrites the stored state for `endpoint`.
    pub fn set_state(&self, endpoint: Endpoint, state: RateLimitState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint, state);
    }

    /// Updates state from response headers. Responses without the
    /// remaining/reset pair leave the stored state untouched.
    pub fn record(&self, endpoint: Endpoint, headers: &HeaderMap) {
        let Some(state) = parse_headers(headers, Instant::now(), SystemTime::now()) else {
            return;
        };
        tracing::debug!(
            endpoint = %endpoint,
            limit = ?state.limit,
            remaining = ?state.remaining,
            "client: rate-limit state updated"
        );
        self.set_state(endpoint, state);
    }

    /// Delay the gate would impose on a request to `endpoint` right now.
    #[must_use]
    pub fn pending_wait(&self, endpoint: Endpoint) -> Option<Duration> {
        self.state(endpoint)?.wait_needed(Instant::now(), self.margin)
    }

    /// Blocks until `endpoint` has capacity. Returns immediately when it does.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Cancelled`] if the stop signal fires during the wait.
    pub async fn wait_for_capacity(
        &self,
        endpoint: Endpoint,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<(), ApiError> {
        let Some(delay) = self.pending_wait(endpoint) else {
            return Ok(());
        };
        tracing::warn!(
            endpoint = %endpoint,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "client: rate limit exhausted, waiting for reset"
        );
        sleep_or_cancel(delay, cancel).await
    }
}

/// Sleeps for `delay` unless the stop signal is (or becomes) `true` first.
///
/// A dropped sender counts as "never stopping".
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&watch::Receiver<bool>>,
) -> Result<(), ApiError> {
    let Some(cancel) = cancel else {
        tokio::time::sleep(delay).await;
        return Ok(());
    };

    let mut rx = cancel.clone();
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    let stopped = tokio::select! {
        () = &mut sleep => false,
        stopped = async { rx.wait_for(|stop| *stop).await.is_ok() } => stopped,
    };

    if stopped {
        return Err(ApiError::Cancelled);
    }
    sleep.await;
    Ok(())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

/// `X-Rate-Limit-Reset` is epoch seconds; it is converted to a monotonic
/// instant relative to `now`.
fn parse_headers(
    headers: &HeaderMap,
    now: Instant,
    wall_now: SystemTime,
) -> Option<RateLimitState> {
    let remaining = header_u64(headers, REMAINING_HEADER)?;
    let reset_epoch = header_u64(headers, RESET_HEADER)?;
    let limit = header_u64(headers, LIMIT_HEADER);

    let now_epoch = wall_now
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let until_reset = Duration::from_secs(reset_epoch.saturating_sub(now_epoch));

    Some(RateLimitState {
        limit: limit.map(|l| u32::try_from(l).unwrap_or(u32::MAX)),
        remaining: Some(u32::try_from(remaining).unwrap_or(u32::MAX)),
        reset_at: Some(now + until_reset),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn parses_rate_limit_headers() {
        let now = Instant::now();
        let wall = UNIX_EPOCH + Duration::from_secs(1_000);
        let map = headers(&[
            ("x-rate-limit-limit", "60"),
            ("x-rate-limit-remaining", "0"),
            ("x-rate-limit-reset", "1005"),
        ]);
        let state = parse_headers(&map, now, wall).expect("headers present");
        assert_eq!(state.limit, Some(60));
        assert_eq!(state.remaining, Some(0));
        assert_eq!(state.reset_at, Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn reset_in_the_past_means_no_wait() {
        let now = Instant::now();
        let wall = UNIX_EPOCH + Duration::from_secs(2_000);
        let map = headers(&[
            ("x-rate-limit-remaining", "0"),
            ("x-rate-limit-reset", "1500"),
        ]);
        let state = parse_headers(&map, now, wall).unwrap();
        assert_eq!(state.wait_needed(now, Duration::from_secs(1)), None);
    }

    #[test]
    fn missing_headers_yield_nothing() {
        let map = headers(&[("x-rate-limit-limit", "60")]);
        assert!(parse_headers(&map, Instant::now(), SystemTime::now()).is_none());
    }

    #[test]
    fn remaining_capacity_never_waits() {
        let now = Instant::now();
        let state = RateLimitState {
            limit: Some(60),
            remaining: Some(3),
            reset_at: Some(now + Duration::from_secs(30)),
        };
        assert_eq!(state.wait_needed(now, Duration::from_secs(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_waits_until_reset_plus_margin() {
        let margin = Duration::from_millis(500);
        let limiter = RateLimiter::new(margin);
        let start = Instant::now();
        limiter.set_state(
            Endpoint::Search,
            RateLimitState {
                limit: Some(60),
                remaining: Some(0),
                reset_at: Some(start + Duration::from_secs(5)),
            },
        );

        limiter
            .wait_for_capacity(Endpoint::Search, None)
            .await
            .unwrap();

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(5) + margin, "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn other_endpoints_are_not_gated() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.set_state(
            Endpoint::Search,
            RateLimitState {
                limit: None,
                remaining: Some(0),
                reset_at: Some(start + Duration::from_secs(30)),
            },
        );
        limiter.wait_for_capacity(Endpoint::User, None).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_interrupts_the_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.set_state(
            Endpoint::Search,
            RateLimitState {
                limit: None,
                remaining: Some(0),
                reset_at: Some(Instant::now() + Duration::from_secs(600)),
            },
        );
        let (tx, rx) = watch::channel(false);
        let start = Instant::now();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = tx.send(true);
        });

        let result = limiter.wait_for_capacity(Endpoint::Search, Some(&rx)).await;
        stopper.await.unwrap();

        assert!(matches!(result, Err(ApiError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(600));
    }
}
