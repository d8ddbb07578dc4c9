use chrono::{DateTime, Utc};

use serde_json::Value;

use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
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
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub trace_id: String,
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: String,
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub max_retries: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Dlq,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Dlq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dlq => "dlq",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "dlq" => Some(JobStatus::Dlq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DlqEntry {
    pub id: Uuid,
    pub original_job_id: Uuid,
    pub tenant_id: String,
    pub payload: Value,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub failed_at: DateTime<Utc>,
    pub trace_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }
}
