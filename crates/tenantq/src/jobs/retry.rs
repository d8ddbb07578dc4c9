use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::jobs::error::{QueueError, Result};

/// Policy for retrying transient store failures in place.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub jitter_pct: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter_pct: 0.20,
        }
    }
}

pub fn next_delay(attempt: u32, policy: &BackoffPolicy, rng: &mut impl Rng) -> Duration {
    let base = policy.initial_delay.as_secs_f64() * policy.factor.powi(attempt as i32);

    // jitter in range [-jitter_pct, +jitter_pct]
    let jitter_range = base * policy.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    Duration::from_secs_f64((base + jitter).max(0.0))
}

/// Run `op`, retrying transient store errors with exponential backoff.
/// Non-transient errors propagate immediately.
pub async fn with_backoff<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = {
                    let mut rng = rand::thread_rng();
                    next_delay(attempt, policy, &mut rng)
                };
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient store error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_by_factor() {
        let policy = BackoffPolicy {
            jitter_pct: 0.0,
            ..BackoffPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(next_delay(0, &policy, &mut rng), Duration::from_secs(1));
        assert_eq!(next_delay(1, &policy, &mut rng), Duration::from_secs(2));
        assert_eq!(next_delay(2, &policy, &mut rng), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);

        for attempt in 0..5 {
            let base = policy.initial_delay.as_secs_f64() * policy.factor.powi(attempt);
            let delay = next_delay(attempt as u32, &policy, &mut rng).as_secs_f64();
            assert!(delay >= base * (1.0 - policy.jitter_pct) - f64::EPSILON);
            assert!(delay <= base * (1.0 + policy.jitter_pct) + f64::EPSILON);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);

        let result = with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(QueueError::Store(sqlx::Error::PoolTimedOut))
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
    async fn non_transient_errors_propagate_immediately() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(QueueError::NotFound) }
        })
        .await;

        assert!(matches!(result, Err(QueueError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
