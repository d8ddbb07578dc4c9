use serde::Serialize;

use crate::bus::{EventBus, Topic};
use crate::jobs::{JobStatus, JobsRepo, Result};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub total_jobs: i64,
    pub pending_jobs: i64,
    pub running_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub dlq_jobs: i64,
}

/// On-demand aggregation over the store. Every snapshot is also pushed
/// onto the bus so live subscribers refresh without polling.
#[derive(Clone)]
pub struct MetricsService {
    jobs: JobsRepo,
    bus: EventBus,
}

impl MetricsService {
    pub fn new(jobs: JobsRepo, bus: EventBus) -> Self {
        Self { jobs, bus }
    }

    pub async fn snapshot(&self, tenant_id: Option<&str>) -> Result<MetricsSnapshot> {
        let pending = self.jobs.count_by_status(JobStatus::Pending, tenant_id).await?;
        let running = self.jobs.count_by_status(JobStatus::Running, tenant_id).await?;
        let completed = self
            .jobs
            .count_by_status(JobStatus::Completed, tenant_id)
            .await?;
        let failed = self.jobs.count_by_status(JobStatus::Failed, tenant_id).await?;
        let dlq = self.jobs.count_by_status(JobStatus::Dlq, tenant_id).await?;

        let snapshot = MetricsSnapshot {
            total_jobs: pending + running + completed + failed + dlq,
            pending_jobs: pending,
            running_jobs: running,
            completed_jobs: completed,
            failed_jobs: failed,
            dlq_jobs: dlq,
        };

        self.bus
            .publish(
                Topic::MetricsUpdated,
                serde_json::to_value(snapshot).unwrap_or_default(),
            )
            .await;

        Ok(snapshot)
    }
}
