// tests/worker_pool.rs
//
// End-to-end runs through the real pool: submit over the service, let
// workers lease and execute, observe transitions and events.
mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{create_tenant, setup_db};
use serde_json::{json, Value};
use serial_test::serial;
use sqlx::PgPool;
use uuid::Uuid;

use tenantq::{
    Admission, EventBus, JobService, JobsRepo, PgQueue, RateLimiter, SimulatedProcessor, Topic,
    WorkerConfig, WorkerPool,
};

struct Harness {
    service: JobService,
    jobs: JobsRepo,
    pool: WorkerPool,
    events: Arc<Mutex<Vec<(Topic, Value)>>>,
}

fn start_harness(db: &PgPool, workers: usize) -> Harness {
    let bus = EventBus::new();

    let events: Arc<Mutex<Vec<(Topic, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe_all(move |topic, payload| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().unwrap().push((topic, payload));
            Ok(())
        })
    });

    let jobs = JobsRepo::new(db.clone());
    let queue = Arc::new(PgQueue::new(jobs.clone(), 30));
    let admission = Admission::new(jobs.clone(), RateLimiter::new());
    let service = JobService::new(jobs.clone(), queue.clone(), admission, bus.clone());

    let mut pool = WorkerPool::new(
        queue,
        jobs.clone(),
        bus,
        Arc::new(SimulatedProcessor::new(Duration::from_millis(50))),
        WorkerConfig {
            lease_seconds: 30,
            poll_interval: Duration::from_millis(100),
        },
    );
    pool.start(workers);

    Harness {
        service,
        jobs,
        pool,
        events,
    }
}

async fn wait_for_status(jobs: &JobsRepo, job_id: Uuid, status: &str, deadline: Duration) {
    let started = tokio::time::Instant::now();
    loop {
        let job = jobs.get_job(job_id).await.unwrap().unwrap();
        if job.status == status {
            return;
        }
        assert!(
            started.elapsed() < deadline,
            "job {job_id} stuck in status {} waiting for {status}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
#[serial]
async fn happy_path_runs_to_completed_with_consistent_events() {
    let Some(db) = setup_db().await else { return };
    let tenant = create_tenant(&db, "t1", 5, 10).await;
    let mut harness = start_harness(&db, 2);

    let job = harness
        .service
        .submit_job(&tenant, json!({"task": "noop"}), None, 3)
        .await
        .unwrap();

    wait_for_status(&harness.jobs, job.id, "completed", Duration::from_secs(5)).await;

    let done = harness.jobs.get_job(job.id).await.unwrap().unwrap();
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.lease_expires_at.is_none());
    assert_eq!(done.retry_count, 0);

    harness.pool.stop().await;

    let events = harness.events.lock().unwrap();
    for expected in [Topic::JobSubmitted, Topic::JobStarted, Topic::JobCompleted] {
        let event = events
            .iter()
            .find(|(topic, payload)| *topic == expected && payload["job_id"] == json!(job.id))
            .unwrap_or_else(|| panic!("missing {expected:?} event"));
        assert_eq!(event.1["trace_id"], json!(job.trace_id));
    }
}

#[tokio::test]
#[serial]
async fn failing_payload_walks_retries_into_the_dlq() {
    let Some(db) = setup_db().await else { return };
    let tenant = create_tenant(&db, "t1", 5, 100).await;
    let mut harness = start_harness(&db, 2);

    let job = harness
        .service
        .submit_job(
            &tenant,
            json!({"error": true, "error_message": "boom"}),
            None,
            2,
        )
        .await
        .unwrap();

    wait_for_status(&harness.jobs, job.id, "dlq", Duration::from_secs(15)).await;

    let dead = harness.jobs.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(dead.retry_count, 2);
    assert_eq!(dead.error_message.as_deref(), Some("boom"));

    let archive = harness.jobs.list_dlq(Some(&tenant.id), 10).await.unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].original_job_id, job.id);
    assert_eq!(archive[0].retry_count, 2);
    assert_eq!(archive[0].error_message.as_deref(), Some("boom"));
    assert_eq!(archive[0].trace_id, job.trace_id);

    harness.pool.stop().await;

    let events = harness.events.lock().unwrap();
    let count = |wanted: Topic| {
        events
            .iter()
            .filter(|(topic, payload)| *topic == wanted && payload["job_id"] == json!(job.id))
            .count()
    };
    assert_eq!(count(Topic::JobRetry), 2);
    assert_eq!(count(Topic::JobDlq), 1);
    assert_eq!(count(Topic::JobFailed), 3);
}

#[tokio::test]
#[serial]
async fn zero_budget_failure_goes_to_dlq_after_one_attempt() {
    let Some(db) = setup_db().await else { return };
    let tenant = create_tenant(&db, "t1", 5, 10).await;
    let mut harness = start_harness(&db, 1);

    let job = harness
        .service
        .submit_job(&tenant, json!({"error": true}), None, 0)
        .await
        .unwrap();

    wait_for_status(&harness.jobs, job.id, "dlq", Duration::from_secs(5)).await;

    let archive = harness.jobs.list_dlq(Some(&tenant.id), 10).await.unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].retry_count, 0);

    harness.pool.stop().await;

    let events = harness.events.lock().unwrap();
    assert!(
        !events.iter().any(|(topic, _)| *topic == Topic::JobRetry),
        "no retry may be scheduled with a zero budget"
    );
}

#[tokio::test]
#[serial]
async fn stopped_pool_leaves_pending_work_untouched() {
    let Some(db) = setup_db().await else { return };
    let tenant = create_tenant(&db, "t1", 5, 10).await;
    let mut harness = start_harness(&db, 1);
    harness.pool.stop().await;

    let job = harness
        .service
        .submit_job(&tenant, json!({"task": "later"}), None, 3)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let still_pending = harness.jobs.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(still_pending.status, "pending");
}
