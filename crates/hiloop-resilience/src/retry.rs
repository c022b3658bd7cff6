use std::time::Duration;
use tracing::{debug, warn};
use rand::Rng;

use crate::{AdapterError, AdapterResult};

/// Exponential backoff with jitter, matching spec `retry_backoff` defaults
/// (initial=1s, multiplier=2.0, max=60s, max_attempts=3).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry attempt `attempt` (0-based). Exposed directly so
    /// the workflow retry path can compute and record an advisory delay
    /// without sleeping (spec §4.4: "the engine does not sleep, the caller
    /// may").
    pub fn calculate_backoff(&self, attempt: usize) -> Duration {
        let base_backoff =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);

        let backoff = base_backoff.min(self.max_backoff.as_secs_f64());

        let backoff = if self.jitter {
            let mut rng = rand::thread_rng();
            let jitter_factor = rng.gen_range(0.5..1.5);
            backoff * jitter_factor
        } else {
            backoff
        };

        Duration::from_secs_f64(backoff)
    }

    pub async fn execute<F, Fut, T>(&self, mut f: F) -> AdapterResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AdapterResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let backoff = self.calculate_backoff(attempt - 1);
                debug!(attempt = attempt + 1, max = self.max_attempts, ?backoff, "retrying");
                tokio::time::sleep(backoff).await;
            }

            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "operation succeeded on retry");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, max = self.max_attempts, error = %e, "operation failed");

                    if !is_retryable(&e) {
                        debug!("error is not retryable, stopping");
                        return Err(e);
                    }

                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AdapterError::Unknown("all retry attempts failed".to_string())))
    }
}

pub async fn with_retry<F, Fut, T>(max_attempts: usize, f: F) -> AdapterResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AdapterResult<T>>,
{
    RetryPolicy::new(max_attempts).execute(f).await
}

fn is_retryable(error: &AdapterError) -> bool {
    match error {
        AdapterError::ConnectionError(_) => true,
        AdapterError::RequestFailed(_) => true,
        AdapterError::Timeout(_) => true,
        AdapterError::ServiceUnavailable(_) => true,
        AdapterError::CircuitBreakerOpen => false,
        AdapterError::SerializationError(_) => false,
        AdapterError::InvalidResponse(_) => false,
        AdapterError::Unknown(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let policy = RetryPolicy::new(3);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AdapterError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_one_retryable_failure() {
        let policy =
            RetryPolicy::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(5));
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt == 0 {
                        Err(AdapterError::RequestFailed("first attempt failed".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let policy =
            RetryPolicy::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(5));
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(AdapterError::RequestFailed("always fails".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(3);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(AdapterError::CircuitBreakerOpen)
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_without_jitter() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_secs(1), Duration::from_secs(60))
            .with_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_backoff(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_caps_at_max() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_secs(1), Duration::from_secs(60))
            .with_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_backoff(10), Duration::from_secs(60));
    }
}
