use std::future::Future;
use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio_util::sync::CancellationToken;

use crate::model::config::BatchSettings;
use crate::services::log::LogSink;
use crate::services::providers::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Translated(Vec<String>),
    /// Every attempt failed; callers fall back to the source texts.
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_settings(&BatchSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &BatchSettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            jitter: Duration::from_millis(settings.retry_jitter_ms),
        }
    }

    /// Linear backoff: `base * attempt` plus up to `jitter` of noise.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let noise = if jitter_ms == 0 {
            0
        } else {
            thread_rng().gen_range(0..=jitter_ms)
        };
        let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(attempt)
            .saturating_add(Duration::from_millis(noise))
    }

    /// Calls `op` until it yields exactly `expected` results, attempts run
    /// out, or `cancel` fires between attempts. Failures are logged, never
    /// raised.
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        log: &LogSink,
        source: &str,
        expected: usize,
        mut op: F,
    ) -> UnitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<String>, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return UnitOutcome::Cancelled;
            }

            // A request already on the wire is allowed to finish.
            let err = match op().await {
                Ok(out) if out.len() == expected => return UnitOutcome::Translated(out),
                Ok(out) => ProviderError::LengthMismatch {
                    expected,
                    actual: out.len(),
                },
                Err(e) => e,
            };

            if attempt == attempts || !err.is_retryable() {
                log.error(
                    source,
                    format!("giving up after attempt {attempt}/{attempts}: {err}"),
                );
                return UnitOutcome::Failed;
            }

            let delay = self.delay_for(attempt);
            log.warn(
                source,
                format!(
                    "attempt {attempt}/{attempts} failed: {err}; retrying in {} ms",
                    delay.as_millis()
                ),
            );

            tokio::select! {
                _ = cancel.cancelled() => return UnitOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        UnitOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn delay_grows_linearly_within_jitter() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(100),
        };
        let d = p.delay_for(2);
        assert!(d >= Duration::from_millis(1000));
        assert!(d <= Duration::from_millis(1100));
    }

    #[test]
    fn huge_base_delay_saturates() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(u64::MAX),
            jitter: Duration::from_millis(100),
        };
        assert_eq!(p.delay_for(3), Duration::MAX);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let (log, mut rx) = LogSink::channel();

        let out = fast()
            .run(&CancellationToken::new(), &log, "test", 1, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::Format("flaky".into()))
                    } else {
                        Ok(vec!["done".to_string()])
                    }
                }
            })
            .await;

        assert_eq!(out, UnitOutcome::Translated(vec!["done".into()]));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().unwrap().message.contains("attempt 1/3"));
    }

    #[tokio::test]
    async fn wrong_length_counts_as_failure() {
        let calls = AtomicUsize::new(0);
        let out = fast()
            .run(&CancellationToken::new(), &LogSink::disabled(), "test", 2, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec!["only one".to_string()]) }
            })
            .await;

        assert_eq!(out, UnitOutcome::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let started = std::time::Instant::now();
        let out = policy
            .run(&cancel, &LogSink::disabled(), "test", 1, || {
                trigger.cancel();
                async { Err(ProviderError::Format("down".into())) }
            })
            .await;

        assert_eq!(out, UnitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn in_flight_attempt_finishes_after_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let out = fast()
            .run(&cancel, &LogSink::disabled(), "test", 1, || {
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(vec!["late".to_string()])
                }
            })
            .await;

        assert_eq!(out, UnitOutcome::Translated(vec!["late".into()]));
    }
}
