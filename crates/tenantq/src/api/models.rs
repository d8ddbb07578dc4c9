// crates/tenantq/src/api/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::{DlqEntry, Job};

#[derive(Debug, Deserialize)]
pub struct JobCreateRequest {
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub max_retries: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: String,
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub max_retries: i32,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub trace_id: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            tenant_id: job.tenant_id,
            status: job.status,
            payload: job.payload,
            idempotency_key: job.idempotency_key,
            max_retries: job.max_retries,
            retry_count: job.retry_count,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message,
            trace_id: job.trace_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DlqEntryResponse {
    pub id: Uuid,
    pub original_job_id: Uuid,
    pub tenant_id: String,
    pub payload: Value,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub failed_at: DateTime<Utc>,
    pub trace_id: String,
}

impl From<DlqEntry> for DlqEntryResponse {
    fn from(entry: DlqEntry) -> Self {
        Self {
            id: entry.id,
            original_job_id: entry.original_job_id,
            tenant_id: entry.tenant_id,
            payload: entry.payload,
            error_message: entry.error_message,
            retry_count: entry.retry_count,
            failed_at: entry.failed_at,
            trace_id: entry.trace_id,
        }
    }
}
