use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use crate::bus::{EventBus, Topic};
use crate::jobs::retry::{with_backoff, BackoffPolicy};
use crate::jobs::{Job, JobsRepo, Result};
use crate::queue::Queue;

pub mod pool;
pub mod processor;

pub use pool::WorkerPool;
pub use processor::{JobProcessor, SimulatedProcessor};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub lease_seconds: i64,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 300,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// One worker: poll, lease, execute, acknowledge, retry-or-DLQ. Workers
/// share nothing but the store; a pool is just N of these plus the
/// reaper.
pub struct Worker {
    worker_id: String,
    queue: Arc<dyn Queue>,
    jobs: JobsRepo,
    bus: EventBus,
    processor: Arc<dyn JobProcessor>,
    cfg: WorkerConfig,
    backoff: BackoffPolicy,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<dyn Queue>,
        jobs: JobsRepo,
        bus: EventBus,
        processor: Arc<dyn JobProcessor>,
        cfg: WorkerConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            jobs,
            bus,
            processor,
            cfg,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Main loop. Polls until the shutdown signal flips; a cancelled
    /// worker drops its in-flight job without acknowledging, leaving the
    /// lease to expire and the reaper to recover it.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.worker_id, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let processed = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.run_once() => match result {
                    Ok(processed) => processed,
                    Err(err) => {
                        tracing::error!(
                            worker_id = %self.worker_id,
                            error = %err,
                            "worker iteration failed"
                        );
                        false
                    }
                },
            };

            if !processed {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.cfg.poll_interval) => {}
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// One iteration: dequeue-and-lease, then execute. Returns false when
    /// the queue was empty.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.queue.dequeue(&self.worker_id).await? else {
            return Ok(false);
        };

        self.process_job(job).await;
        Ok(true)
    }

    async fn process_job(&self, job: Job) {
        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            trace_id = %job.trace_id,
            "job processing started"
        );

        self.bus
            .publish(
                Topic::JobStarted,
                json!({
                    "job_id": job.id,
                    "tenant_id": job.tenant_id,
                    "worker_id": self.worker_id,
                    "trace_id": job.trace_id,
                }),
            )
            .await;

        match self.processor.process(&job.payload).await {
            Ok(result) => {
                if let Err(err) = self.complete_job(&job, result).await {
                    tracing::error!(
                        worker_id = %self.worker_id,
                        job_id = %job.id,
                        trace_id = %job.trace_id,
                        error = %err,
                        "failed to record job completion"
                    );
                }
            }
            Err(processor_err) => {
                let error_message = processor_err.to_string();
                tracing::error!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    trace_id = %job.trace_id,
                    error = %error_message,
                    "job processing failed"
                );

                if let Err(err) = self.handle_failure(&job, &error_message).await {
                    tracing::error!(
                        worker_id = %self.worker_id,
                        job_id = %job.id,
                        trace_id = %job.trace_id,
                        error = %err,
                        "failed to record job failure"
                    );
                }
            }
        }
    }

    async fn complete_job(&self, job: &Job, result: serde_json::Value) -> Result<()> {
        with_backoff(&self.backoff, || {
            self.queue.ack(job.id, true, None)
        })
        .await?;

        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            trace_id = %job.trace_id,
            "job processing completed"
        );

        self.bus
            .publish(
                Topic::JobCompleted,
                json!({
                    "job_id": job.id,
                    "tenant_id": job.tenant_id,
                    "worker_id": self.worker_id,
                    "trace_id": job.trace_id,
                    "result": result,
                }),
            )
            .await;

        Ok(())
    }

    /// Failure branch: mark FAILED first so the outcome is durable even
    /// if we die before deciding retry vs DLQ, then re-read and branch.
    async fn handle_failure(&self, job: &Job, error_message: &str) -> Result<()> {
        with_backoff(&self.backoff, || {
            self.queue.ack(job.id, false, Some(error_message))
        })
        .await?;

        let current = self
            .jobs
            .get_job(job.id)
            .await?
            .unwrap_or_else(|| job.clone());

        if current.can_retry() {
            let bumped = with_backoff(&self.backoff, || self.jobs.bump_retry(job.id)).await?;

            tracing::info!(
                job_id = %bumped.id,
                retry_count = bumped.retry_count,
                max_retries = bumped.max_retries,
                trace_id = %bumped.trace_id,
                "job retry scheduled"
            );

            self.bus
                .publish(
                    Topic::JobRetry,
                    json!({
                        "job_id": bumped.id,
                        "tenant_id": bumped.tenant_id,
                        "retry_count": bumped.retry_count,
                        "trace_id": bumped.trace_id,
                    }),
                )
                .await;
        } else {
            with_backoff(&self.backoff, || {
                self.jobs.move_to_dlq(&current, error_message)
            })
            .await?;

            tracing::warn!(
                job_id = %current.id,
                tenant_id = %current.tenant_id,
                retry_count = current.retry_count,
                trace_id = %current.trace_id,
                "job moved to dlq"
            );

            self.bus
                .publish(
                    Topic::JobDlq,
                    json!({
                        "job_id": current.id,
                        "tenant_id": current.tenant_id,
                        "error_message": error_message,
                        "trace_id": current.trace_id,
                    }),
                )
                .await;
        }

        self.bus
            .publish(
                Topic::JobFailed,
                json!({
                    "job_id": job.id,
                    "tenant_id": job.tenant_id,
                    "worker_id": self.worker_id,
                    "error": error_message,
                    "trace_id": job.trace_id,
                }),
            )
            .await;

        Ok(())
    }
}
