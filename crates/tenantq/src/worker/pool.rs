use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, Topic};
use crate::jobs::JobsRepo;
use crate::queue::Queue;
use crate::worker::{JobProcessor, Worker, WorkerConfig};

/// How long `stop` waits for workers to wind down before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fixed-size group of workers sharing the store, plus the reaper task
/// that recovers expired leases. Started once at process startup,
/// stopped on shutdown.
pub struct WorkerPool {
    queue: Arc<dyn Queue>,
    jobs: JobsRepo,
    bus: EventBus,
    processor: Arc<dyn JobProcessor>,
    cfg: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn Queue>,
        jobs: JobsRepo,
        bus: EventBus,
        processor: Arc<dyn JobProcessor>,
        cfg: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            jobs,
            bus,
            processor,
            cfg,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Spawn `pool_size` worker loops and the reaper as independent
    /// tasks.
    pub fn start(&mut self, pool_size: usize) {
        tracing::info!(pool_size, "worker pool starting");

        for i in 0..pool_size {
            let worker = Worker::new(
                format!("worker-{}", i + 1),
                self.queue.clone(),
                self.jobs.clone(),
                self.bus.clone(),
                self.processor.clone(),
                self.cfg.clone(),
            );
            let shutdown = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(worker.run(shutdown)));
        }

        let reaper = Reaper {
            jobs: self.jobs.clone(),
            bus: self.bus.clone(),
            interval: self.cfg.poll_interval,
        };
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(reaper.run(shutdown)));

        tracing::info!(pool_size, "worker pool started");
    }

    /// Signal every task and wait up to the grace window; stragglers are
    /// aborted so shutdown stays bounded.
    pub async fn stop(&mut self) {
        tracing::info!("worker pool stopping");

        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut self.tasks);
        let abort_handles: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();

        let all_done = futures::future::join_all(tasks);
        if tokio::time::timeout(SHUTDOWN_GRACE, all_done).await.is_err() {
            for handle in abort_handles {
                handle.abort();
            }
            tracing::warn!("worker pool shutdown grace elapsed, tasks aborted");
        }

        tracing::info!("worker pool stopped");
    }
}

/// Background sweep demoting expired RUNNING leases back to PENDING (or
/// to the DLQ once the retry budget is gone). Runs on the same cadence
/// as worker polling.
struct Reaper {
    jobs: JobsRepo,
    bus: EventBus,
    interval: Duration,
}

impl Reaper {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.jobs.reap_expired().await {
                Ok(outcome) => {
                    for job in &outcome.requeued {
                        tracing::warn!(
                            job_id = %job.id,
                            tenant_id = %job.tenant_id,
                            retry_count = job.retry_count,
                            trace_id = %job.trace_id,
                            "expired lease requeued"
                        );
                        self.bus
                            .publish(
                                Topic::JobRetry,
                                json!({
                                    "job_id": job.id,
                                    "tenant_id": job.tenant_id,
                                    "retry_count": job.retry_count,
                                    "trace_id": job.trace_id,
                                }),
                            )
                            .await;
                    }

                    for job in &outcome.dead {
                        tracing::warn!(
                            job_id = %job.id,
                            tenant_id = %job.tenant_id,
                            retry_count = job.retry_count,
                            trace_id = %job.trace_id,
                            "expired lease exhausted retries, sent to dlq"
                        );
                        self.bus
                            .publish(
                                Topic::JobDlq,
                                json!({
                                    "job_id": job.id,
                                    "tenant_id": job.tenant_id,
                                    "error_message": job.error_message,
                                    "trace_id": job.trace_id,
                                }),
                            )
                            .await;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "lease reaper sweep failed");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
