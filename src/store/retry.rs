use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;
use crate::error::{BoardError, Result};

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts. Each attempt must be a complete
/// begin..commit unit so a retry starts from fresh committed state.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_transient() => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::warn!(operation = name, attempts = attempt, error = %err, "Giving up after transient failures");
                    return Err(BoardError::TransientStore(format!(
                        "{} failed after {} attempts: {}",
                        name, attempt, err
                    )));
                }
                let delay = jittered(policy.backoff_delay(attempt - 1));
                tracing::warn!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient store failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Spread retries of concurrent losers: uniform in [delay/2, delay].
fn jittered(delay: Duration) -> Duration {
    let max_ms = delay.as_millis() as u64;
    if max_ms < 2 {
        return delay;
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(max_ms / 2..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast_policy(5), "test", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BoardError::TransientStore("deadlock".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast_policy(3), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BoardError::TransientStore("deadlock".to_string()))
        })
        .await;
        assert!(matches!(result, Err(BoardError::TransientStore(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast_policy(5), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BoardError::NotFound("job 1".to_string()))
        })
        .await;
        assert_eq!(result, Err(BoardError::NotFound("job 1".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let d = jittered(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
        assert_eq!(jittered(Duration::from_millis(1)), Duration::from_millis(1));
    }
}
