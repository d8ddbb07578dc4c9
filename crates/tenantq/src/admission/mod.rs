use crate::jobs::{Job, JobsRepo, QueueError, Result};
use crate::tenants::Tenant;

pub mod rate_limit;

pub use rate_limit::RateLimiter;

/// Per-tenant admission policy for the submission path. The idempotency
/// short-circuit runs before the concurrency quota and the token-bucket
/// rate limit, so a retried submission is never penalized by the quota
/// checks.
#[derive(Clone)]
pub struct Admission {
    jobs: JobsRepo,
    limiter: RateLimiter,
}

impl Admission {
    pub fn new(jobs: JobsRepo, limiter: RateLimiter) -> Self {
        Self { jobs, limiter }
    }

    /// Returns `Some(existing)` when the idempotency key already names a
    /// job (whatever its status), `None` when the submission is admitted
    /// as new work, or an error when a quota rejects it.
    pub async fn admit(
        &self,
        tenant: &Tenant,
        idempotency_key: Option<&str>,
    ) -> Result<Option<Job>> {
        if let Some(key) = idempotency_key {
            if let Some(existing) = self.jobs.get_by_idempotency(&tenant.id, key).await? {
                tracing::debug!(
                    tenant_id = %tenant.id,
                    job_id = %existing.id,
                    trace_id = %existing.trace_id,
                    "idempotent resubmission, returning existing job"
                );
                return Ok(Some(existing));
            }
        }

        // Soft quota: the read is racy against concurrent submitters, so
        // transient overshoot by N_submitters - 1 is accepted.
        let running = self.jobs.count_running(&tenant.id).await?;
        if running >= i64::from(tenant.max_concurrent_jobs) {
            return Err(QueueError::QuotaExceeded {
                running,
                limit: i64::from(tenant.max_concurrent_jobs),
            });
        }

        if !self.limiter.try_acquire(&tenant.id, tenant.rate_limit_per_minute) {
            return Err(QueueError::RateLimited {
                limit_per_minute: tenant.rate_limit_per_minute,
            });
        }

        Ok(None)
    }
}
