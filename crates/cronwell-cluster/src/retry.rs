use std::future::Future;
use std::time::Duration;

use cronwell_core::config::ClusterConfig;
use tracing::{info, warn};

/// Fixed-delay retry for peer calls: one initial attempt plus `retries`
/// more, sleeping `delay` before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn from_config(cfg: &ClusterConfig) -> Self {
        Self::new(cfg.retry_count, Duration::from_millis(cfg.retry_delay_ms))
    }

    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Run `op` until it succeeds or the retries are exhausted; the last
    /// error is returned.
    pub async fn run<T, E, F, Fut>(&self, call: &str, node: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(call, node, attempt, "peer call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(e);
                    }
                    warn!(call, node, attempt, err = %e, "peer call failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn exhausts_initial_attempt_plus_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run("health_check", "n1:1", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("refused".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<u32, String> = policy
            .run("health_check", "n1:1", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 1 {
                    Err("refused".to_string())
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_delay_between_attempts() {
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();
        let _: Result<(), &str> = policy.run("x", "n", || async { Err("down") }).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(2000));
    }

    #[test]
    fn defaults_follow_cluster_config() {
        let policy = RetryPolicy::from_config(&ClusterConfig::default());
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.attempts(), 4);
    }
}
