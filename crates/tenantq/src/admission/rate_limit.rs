use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Per-tenant token bucket. Tokens accrue continuously at
/// `rate_per_minute / 60` per second up to `rate_per_minute`; each
/// admitted submission consumes one.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_minute: i32, now: Instant) -> Self {
        let capacity = f64::from(rate_per_minute.max(1));
        Self {
            capacity,
            refill_rate: capacity / 60.0,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Process-local rate limiter keyed by tenant. Intentionally NOT
/// cluster-global: a deployment of N processes admits up to
/// N * rate_per_minute per tenant. Documented, accepted laxity.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>>,
    max_tenants: usize,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_capacity(100_000)
    }

    pub fn with_capacity(max_tenants: usize) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            max_tenants: max_tenants.max(1),
        }
    }

    /// True when the submission fits the tenant's budget.
    pub fn try_acquire(&self, tenant_id: &str, rate_per_minute: i32) -> bool {
        self.try_acquire_at(tenant_id, rate_per_minute, Instant::now())
    }

    pub(crate) fn try_acquire_at(
        &self,
        tenant_id: &str,
        rate_per_minute: i32,
        now: Instant,
    ) -> bool {
        let bucket = {
            let mut buckets = self.buckets.lock().expect("rate limiter map poisoned");

            if !buckets.contains_key(tenant_id) && buckets.len() >= self.max_tenants {
                evict_oldest(&mut buckets);
            }

            buckets
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(rate_per_minute, now))))
                .clone()
        };

        // refill + deduct under the per-bucket lock so concurrent
        // submitters for the same tenant can't lose updates
        let mut bucket = bucket.lock().expect("token bucket poisoned");
        bucket.try_consume(now)
    }

    /// Drop a tenant's bucket, restoring a full budget.
    pub fn reset(&self, tenant_id: &str) {
        let mut buckets = self.buckets.lock().expect("rate limiter map poisoned");
        buckets.remove(tenant_id);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_oldest(buckets: &mut HashMap<String, Arc<Mutex<TokenBucket>>>) {
    let oldest = buckets
        .iter()
        .min_by_key(|(_, bucket)| bucket.lock().expect("token bucket poisoned").last_refill)
        .map(|(key, _)| key.clone());

    if let Some(key) = oldest {
        buckets.remove(&key);
    }
}
