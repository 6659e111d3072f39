use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dynosql_client::TransportError;
use rand::Rng;
use tracing::debug;
use tracing::warn;

use crate::error::DriverError;
use crate::error::Result;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 20_000;

/// Exponential backoff policy applied around every remote call.
///
/// `max_attempts` counts *retries*: a call is issued `max_attempts + 1`
/// times at most.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries, for call sites that must fail fast.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (zero-based):
    /// `min(base * 2^attempt, max)`, uniformly sampled from `[delay/2, delay]`
    /// when jitter is enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        let exp = attempt.min(32);
        let delay = base.saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX)).min(max);
        if self.jitter && delay > 0 {
            Duration::from_millis(rand::rng().random_range(delay / 2..=delay))
        } else {
            Duration::from_millis(delay)
        }
    }

    /// Run `operation` with retries on retryable transport failures.
    ///
    /// Non-retryable failures surface immediately as [`DriverError::Remote`];
    /// an exhausted budget surfaces as [`DriverError::Transient`].
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            METRICS.attempts.fetch_add(1, Ordering::Relaxed);
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        METRICS.successes_after_retry.fetch_add(1, Ordering::Relaxed);
                        debug!(op, attempt, "remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if error.is_throttling() {
                        METRICS.throttling_events.fetch_add(1, Ordering::Relaxed);
                    }
                    if error.is_retryable() && attempt < self.max_attempts {
                        let delay = self.delay(attempt);
                        debug!(
                            op,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "retrying remote call"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    METRICS.fatal_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(op, attempt, error = %error, "remote call failed");
                    return Err(if error.is_retryable() {
                        DriverError::Transient {
                            attempts: attempt + 1,
                            source: error,
                        }
                    } else {
                        DriverError::Remote { source: error }
                    });
                }
            }
        }
    }
}

struct RetryMetrics {
    attempts: AtomicU64,
    successes_after_retry: AtomicU64,
    throttling_events: AtomicU64,
    fatal_failures: AtomicU64,
}

static METRICS: RetryMetrics = RetryMetrics {
    attempts: AtomicU64::new(0),
    successes_after_retry: AtomicU64::new(0),
    throttling_events: AtomicU64::new(0),
    fatal_failures: AtomicU64::new(0),
};

/// Point-in-time view of the process-wide retry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryMetricsSnapshot {
    pub attempts: u64,
    pub successes_after_retry: u64,
    pub throttling_events: u64,
    pub fatal_failures: u64,
}

pub fn retry_metrics() -> RetryMetricsSnapshot {
    RetryMetricsSnapshot {
        attempts: METRICS.attempts.load(Ordering::Relaxed),
        successes_after_retry: METRICS.successes_after_retry.load(Ordering::Relaxed),
        throttling_events: METRICS.throttling_events.load(Ordering::Relaxed),
        fatal_failures: METRICS.fatal_failures.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use dynosql_client::TransportError;
    use pretty_assertions::assert_eq;

    use super::RetryPolicy;
    use super::retry_metrics;
    use crate::error::DriverError;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(20_000),
            jitter,
        }
    }

    #[test]
    fn delay_doubles_and_caps_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_500),
            jitter: false,
        };
        let delays: Vec<u64> = (0..6).map(|i| policy.delay(i).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_500, 1_500]);
        for window in delays.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }

    #[test]
    fn jittered_delay_stays_in_half_open_band() {
        let policy = policy(true);
        for attempt in 0..8 {
            let full = 100u64.saturating_mul(1 << attempt).min(20_000);
            for _ in 0..32 {
                let delay = policy.delay(attempt).as_millis() as u64;
                assert!(delay >= full / 2, "delay {delay} below {}", full / 2);
                assert!(delay <= full, "delay {delay} above {full}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_twice_then_succeed_sleeps_base_plus_double() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(20_000),
            jitter: false,
        };
        let calls = Mutex::new(0u32);
        let started = tokio::time::Instant::now();
        let result = policy
            .run("test", || {
                let call = {
                    let mut calls = calls.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                async move {
                    if call <= 2 {
                        Err(TransportError::Throttled {
                            code: "ThrottlingException".to_string(),
                        })
                    } else {
                        Ok(call)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Mutex::new(0u32);
        let error = policy(false)
            .run("test", || {
                *calls.lock().unwrap() += 1;
                async {
                    Err::<(), _>(TransportError::InvalidRequest {
                        message: "syntax".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(error, DriverError::Remote { .. }));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_transient_with_attempts() {
        let before = retry_metrics();
        let error = policy(false)
            .run("test", || async {
                Err::<(), _>(TransportError::Timeout)
            })
            .await
            .unwrap_err();
        match error {
            DriverError::Transient { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected Transient, got {other:?}"),
        }
        let after = retry_metrics();
        assert!(after.attempts >= before.attempts + 4);
        assert!(after.fatal_failures >= before.fatal_failures + 1);
    }
}
