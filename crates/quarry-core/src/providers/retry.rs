//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::Result;

/// Run `op`, retrying transient provider errors with exponential backoff.
///
/// Non-transient errors fail immediately. The final transient error is
/// returned with its context intact once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetrySettings, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Delay before the next attempt: base * 2^(attempt-1), capped.
fn backoff_delay(policy: &RetrySettings, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let millis = policy
        .base_delay_ms
        .saturating_mul(1u64 << exp)
        .min(policy.max_delay_ms);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::provider_transient("flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::provider_fatal("bad request")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::provider_transient("always down")) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_caps() {
        let policy = RetrySettings {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 5), Duration::from_millis(500));
    }
}
