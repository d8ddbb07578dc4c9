use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::admission::Admission;
use crate::bus::{EventBus, Topic};
use crate::jobs::{DlqEntry, Job, JobStatus, JobsRepo, NewJob, QueueError, Result};
use crate::queue::Queue;
use crate::tenants::Tenant;

/// Orchestrates submission (admission then enqueue) and query.
#[derive(Clone)]
pub struct JobService {
    jobs: JobsRepo,
    queue: Arc<dyn Queue>,
    admission: Admission,
    bus: EventBus,
}

impl JobService {
    pub fn new(
        jobs: JobsRepo,
        queue: Arc<dyn Queue>,
        admission: Admission,
        bus: EventBus,
    ) -> Self {
        Self {
            jobs,
            queue,
            admission,
            bus,
        }
    }

    /// Submit new work for a tenant. A resubmission under a known
    /// idempotency key returns the existing job, whatever its status,
    /// and enqueues nothing.
    pub async fn submit_job(
        &self,
        tenant: &Tenant,
        payload: Value,
        idempotency_key: Option<String>,
        max_retries: i32,
    ) -> Result<Job> {
        if let Some(existing) = self.admission.admit(tenant, idempotency_key.as_deref()).await? {
            return Ok(existing);
        }

        let inserted = self
            .queue
            .enqueue(NewJob {
                tenant_id: tenant.id.clone(),
                payload,
                idempotency_key: idempotency_key.clone(),
                max_retries,
            })
            .await;

        let job = match inserted {
            Ok(job) => job,
            // Lost the insert race against a concurrent submitter using
            // the same key; the row that won is the answer.
            Err(QueueError::DuplicateIdempotency) => {
                let key = idempotency_key.as_deref().unwrap_or_default();
                self.jobs
                    .get_by_idempotency(&tenant.id, key)
                    .await?
                    .ok_or(QueueError::DuplicateIdempotency)?
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            trace_id = %job.trace_id,
            "job submitted"
        );

        self.bus
            .publish(
                Topic::JobSubmitted,
                json!({
                    "job_id": job.id,
                    "tenant_id": job.tenant_id,
                    "status": job.status,
                    "trace_id": job.trace_id,
                }),
            )
            .await;

        Ok(job)
    }

    /// Fetch one job, scoped to a tenant when given. A job owned by a
    /// different tenant is indistinguishable from a missing one.
    pub async fn get_job(&self, job_id: Uuid, tenant_id: Option<&str>) -> Result<Job> {
        let job = self.jobs.get_job(job_id).await?.ok_or(QueueError::NotFound)?;

        if let Some(tenant) = tenant_id {
            if job.tenant_id != tenant {
                return Err(QueueError::NotFound);
            }
        }

        Ok(job)
    }

    pub async fn list_by_status(
        &self,
        status: JobStatus,
        tenant_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        self.jobs.list_by_status(status, tenant_id, limit).await
    }

    pub async fn list_dlq(&self, tenant_id: Option<&str>, limit: i64) -> Result<Vec<DlqEntry>> {
        self.jobs.list_dlq(tenant_id, limit).await
    }
}
