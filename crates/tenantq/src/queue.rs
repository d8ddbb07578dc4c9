use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::{Job, JobsRepo, NewJob, Result};

/// Queue strategy boundary. The store-backed implementation below is the
/// only one today; an external broker would slot in behind the same
/// contract, including the single-reader guarantee of `dequeue`.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<Job>;

    /// Atomically select-and-lease the oldest runnable job, or None. The
    /// `worker_id` is opaque here; it only exists for log correlation.
    async fn dequeue(&self, worker_id: &str) -> Result<Option<Job>>;

    async fn lease(&self, job_id: Uuid, ttl_seconds: i64) -> Result<bool>;

    async fn ack(&self, job_id: Uuid, success: bool, error_message: Option<&str>) -> Result<Job>;
}

pub struct PgQueue {
    jobs: JobsRepo,
    lease_seconds: i64,
}

impl PgQueue {
    pub fn new(jobs: JobsRepo, lease_seconds: i64) -> Self {
        Self {
            jobs,
            lease_seconds,
        }
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn enqueue(&self, job: NewJob) -> Result<Job> {
        self.jobs.insert_job(job).await
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<Job>> {
        let leased = self.jobs.lease_one(self.lease_seconds).await?;
        if let Some(job) = &leased {
            tracing::debug!(
                worker_id,
                job_id = %job.id,
                tenant_id = %job.tenant_id,
                trace_id = %job.trace_id,
                "job dequeued and leased"
            );
        }
        Ok(leased)
    }

    async fn lease(&self, job_id: Uuid, ttl_seconds: i64) -> Result<bool> {
        self.jobs.acquire_lease(job_id, ttl_seconds).await
    }

    async fn ack(&self, job_id: Uuid, success: bool, error_message: Option<&str>) -> Result<Job> {
        self.jobs.acknowledge(job_id, success, error_message).await
    }
}
