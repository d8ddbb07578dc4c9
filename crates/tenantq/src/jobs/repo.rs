// crates/tenantq/src/jobs/repo.rs

use crate::jobs::error::{QueueError, Result};
use crate::jobs::model::{DlqEntry, Job, JobStatus, NewJob};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

/// Jobs transitioned by one reaper sweep, split by where they landed.
#[derive(Debug, Default)]
pub struct ReapOutcome {
    pub requeued: Vec<Job>,
    pub dead: Vec<Job>,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ----------------------------
    // Writes: submission
    // ----------------------------

    /// Insert a PENDING job. The partial unique index on
    /// (tenant_id, idempotency_key) is the authority on duplicates; a
    /// violation surfaces as `DuplicateIdempotency` so the submission
    /// path can hand back the existing row instead.
    pub async fn insert_job(&self, new: NewJob) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, tenant_id, status, payload, idempotency_key,
                              max_retries, retry_count, created_at, trace_id)
            VALUES ($1, $2, $3, $4, $5, $6, 0, now(), $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.tenant_id)
        .bind(JobStatus::Pending.as_str())
        .bind(&new.payload)
        .bind(&new.idempotency_key)
        .bind(new.max_retries)
        .bind(Uuid::new_v4().to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.code().as_deref() == Some("23505")
                    && db.constraint() == Some("ux_jobs_tenant_idempotency")
                {
                    return QueueError::DuplicateIdempotency;
                }
            }
            QueueError::Store(e)
        })?;

        Ok(job)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_by_idempotency(&self, tenant_id: &str, key: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE tenant_id = $1 AND idempotency_key = $2",
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn count_by_status(
        &self,
        status: JobStatus,
        tenant_id: Option<&str>,
    ) -> Result<i64> {
        let count: i64 = match tenant_id {
            Some(tenant) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM jobs WHERE status = $1 AND tenant_id = $2",
                )
                .bind(status.as_str())
                .bind(tenant)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = $1")
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Specialization used by the concurrency quota check.
    pub async fn count_running(&self, tenant_id: &str) -> Result<i64> {
        self.count_by_status(JobStatus::Running, Some(tenant_id)).await
    }

    pub async fn list_by_status(
        &self,
        status: JobStatus,
        tenant_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let limit = limit.clamp(1, 500);

        let rows = match tenant_id {
            Some(tenant) => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE status = $1 AND tenant_id = $2
                    ORDER BY created_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(status.as_str())
                .bind(tenant)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE status = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    pub async fn list_dlq(&self, tenant_id: Option<&str>, limit: i64) -> Result<Vec<DlqEntry>> {
        let limit = limit.clamp(1, 500);

        let rows = match tenant_id {
            Some(tenant) => {
                sqlx::query_as::<_, DlqEntry>(
                    r#"
                    SELECT * FROM dlq
                    WHERE tenant_id = $1
                    ORDER BY failed_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(tenant)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DlqEntry>(
                    "SELECT * FROM dlq ORDER BY failed_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    // ----------------------------
    // Leasing
    // ----------------------------

    /// Lease exactly one runnable job.
    ///
    /// Correctness: SELECT ... FOR UPDATE SKIP LOCKED, so N workers
    /// polling at once pick N distinct rows without blocking each other.
    /// No two callers ever receive the same job from this method while
    /// its lease is live.
    pub async fn lease_one(&self, lease_seconds: i64) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'pending'
              AND (lease_expires_at IS NULL OR lease_expires_at < now())
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let leased = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'running',
                started_at = now(),
                lease_expires_at = now() + ($2::int * interval '1 second')
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(lease_seconds as i32)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(leased))
    }

    /// Conditional lease on a specific PENDING job. Compare-and-swap over
    /// (id, status, lease_expires_at); zero rows affected means another
    /// worker won.
    pub async fn acquire_lease(&self, job_id: Uuid, lease_seconds: i64) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running',
                started_at = now(),
                lease_expires_at = now() + ($2::int * interval '1 second')
            WHERE id = $1
              AND status = 'pending'
              AND (lease_expires_at IS NULL OR lease_expires_at < now())
            "#,
        )
        .bind(job_id)
        .bind(lease_seconds as i32)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// Record the outcome of an attempt. Repeating the call with the same
    /// outcome is a no-op apart from refreshing error_message.
    pub async fn acknowledge(
        &self,
        job_id: Uuid,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<Job> {
        let status = if success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = $2,
                completed_at = COALESCE(completed_at, now()),
                error_message = $3,
                lease_expires_at = NULL
            WHERE id = $1
              AND status IN ('running', $2)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => match self.get_job(job_id).await? {
                Some(existing) => Err(QueueError::InvalidState(format!(
                    "cannot acknowledge job in status {}",
                    existing.status
                ))),
                None => Err(QueueError::NotFound),
            },
        }
    }

    /// Send a FAILED job back to PENDING for another attempt. created_at
    /// is untouched so age ordering stays stable.
    pub async fn bump_retry(&self, job_id: Uuid) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET retry_count = retry_count + 1,
                status = 'pending',
                lease_expires_at = NULL,
                started_at = NULL,
                completed_at = NULL,
                error_message = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        job.ok_or(QueueError::NotFound)
    }

    /// Archive a job that exhausted its retries. The DLQ insert and the
    /// status flip commit together.
    pub async fn move_to_dlq(&self, job: &Job, error_message: &str) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO dlq (id, original_job_id, tenant_id, payload,
                             error_message, retry_count, failed_at, trace_id)
            VALUES ($1, $2, $3, $4, $5, $6, now(), $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.id)
        .bind(&job.tenant_id)
        .bind(&job.payload)
        .bind(error_message)
        .bind(job.retry_count)
        .bind(&job.trace_id)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'dlq',
                completed_at = now(),
                error_message = $2,
                lease_expires_at = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    // ----------------------------
    // Lease-expiry recovery
    // ----------------------------

    /// Reclaim RUNNING jobs whose lease has lapsed (worker crash or
    /// cancellation mid-flight). Each goes back to PENDING with its retry
    /// budget charged, or to the DLQ when the budget is already spent.
    pub async fn reap_expired(&self) -> Result<ReapOutcome> {
        let mut tx = self.pool.begin().await?;

        let expired = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'running'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < now()
            ORDER BY lease_expires_at ASC
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut outcome = ReapOutcome::default();

        for job in expired {
            if job.can_retry() {
                let requeued = sqlx::query_as::<_, Job>(
                    r#"
                    UPDATE jobs
                    SET retry_count = retry_count + 1,
                        status = 'pending',
                        lease_expires_at = NULL,
                        started_at = NULL,
                        completed_at = NULL,
                        error_message = NULL
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(job.id)
                .fetch_one(&mut *tx)
                .await?;

                outcome.requeued.push(requeued);
            } else {
                let reason = "lease expired";

                sqlx::query(
                    r#"
                    INSERT INTO dlq (id, original_job_id, tenant_id, payload,
                                     error_message, retry_count, failed_at, trace_id)
                    VALUES ($1, $2, $3, $4, $5, $6, now(), $7)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(job.id)
                .bind(&job.tenant_id)
                .bind(&job.payload)
                .bind(reason)
                .bind(job.retry_count)
                .bind(&job.trace_id)
                .execute(&mut *tx)
                .await?;

                let dead = sqlx::query_as::<_, Job>(
                    r#"
                    UPDATE jobs
                    SET status = 'dlq',
                        completed_at = now(),
                        error_message = $2,
                        lease_expires_at = NULL
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(job.id)
                .bind(reason)
                .fetch_one(&mut *tx)
                .await?;

                outcome.dead.push(dead);
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}
