// tests/retries.rs
mod common;

use common::{create_tenant, insert_pending_job, setup_db};
use serial_test::serial;

use tenantq::{JobsRepo, QueueError};

#[tokio::test]
#[serial]
async fn failed_acknowledgment_then_bump_returns_job_to_pending() {
    let Some(pool) = setup_db().await else { return };
    let tenant = create_tenant(&pool, "t1", 5, 10).await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_pending_job(&pool, &tenant.id, 3).await;
    let leased = repo.lease_one(30).await.unwrap().expect("should lease");

    let failed = repo
        .acknowledge(job_id, false, Some("boom"))
        .await
        .unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.error_message.as_deref(), Some("boom"));
    assert!(failed.completed_at.is_some());
    assert!(failed.lease_expires_at.is_none());

    let bumped = repo.bump_retry(job_id).await.unwrap();
    assert_eq!(bumped.status, "pending");
    assert_eq!(bumped.retry_count, 1);
    assert!(bumped.started_at.is_none());
    assert!(bumped.completed_at.is_none(), "bump must clear completed_at");
    assert!(bumped.error_message.is_none());
    assert_eq!(bumped.created_at, leased.created_at, "age order must stay stable");
}

#[tokio::test]
#[serial]
async fn exhausted_budget_lands_in_dlq_with_archive_row() {
    let Some(pool) = setup_db().await else { return };
    let tenant = create_tenant(&pool, "t1", 5, 10).await;
    let repo = JobsRepo::new(pool.clone());

    // max_retries = 2 -> three attempts total
    let job_id = insert_pending_job(&pool, &tenant.id, 2).await;

    for attempt in 0..3 {
        let leased = repo.lease_one(30).await.unwrap().expect("should lease");
        assert_eq!(leased.id, job_id);
        assert_eq!(leased.retry_count, attempt);

        repo.acknowledge(job_id, false, Some("boom")).await.unwrap();

        let current = repo.get_job(job_id).await.unwrap().unwrap();
        if current.can_retry() {
            repo.bump_retry(job_id).await.unwrap();
        } else {
            repo.move_to_dlq(&current, "boom").await.unwrap();
        }
    }

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, "dlq");
    assert_eq!(job.retry_count, 2);
    assert!(job.completed_at.is_some());

    let entries = repo.list_dlq(Some(&tenant.id), 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].original_job_id, job_id);
    assert_eq!(entries[0].retry_count, 2);
    assert_eq!(entries[0].error_message.as_deref(), Some("boom"));
    assert_eq!(entries[0].trace_id, job.trace_id);

    // a DLQ row never comes back through the queue
    assert!(repo.lease_one(30).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn zero_budget_job_goes_straight_to_dlq() {
    let Some(pool) = setup_db().await else { return };
    let tenant = create_tenant(&pool, "t1", 5, 10).await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_pending_job(&pool, &tenant.id, 0).await;

    repo.lease_one(30).await.unwrap().expect("should lease");
    repo.acknowledge(job_id, false, Some("boom")).await.unwrap();

    let current = repo.get_job(job_id).await.unwrap().unwrap();
    assert!(!current.can_retry());

    repo.move_to_dlq(&current, "boom").await.unwrap();

    let entries = repo.list_dlq(Some(&tenant.id), 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].retry_count, 0);
}

#[tokio::test]
#[serial]
async fn acknowledge_same_outcome_twice_keeps_first_timestamp() {
    let Some(pool) = setup_db().await else { return };
    let tenant = create_tenant(&pool, "t1", 5, 10).await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_pending_job(&pool, &tenant.id, 3).await;
    repo.lease_one(30).await.unwrap().expect("should lease");

    let first = repo.acknowledge(job_id, true, None).await.unwrap();
    let second = repo.acknowledge(job_id, true, None).await.unwrap();

    assert_eq!(first.status, "completed");
    assert_eq!(second.status, "completed");
    assert_eq!(first.completed_at, second.completed_at);
}

#[tokio::test]
#[serial]
async fn acknowledge_rejects_disallowed_transitions() {
    let Some(pool) = setup_db().await else { return };
    let tenant = create_tenant(&pool, "t1", 5, 10).await;
    let repo = JobsRepo::new(pool.clone());

    // still pending: acknowledging is not a legal transition
    let job_id = insert_pending_job(&pool, &tenant.id, 3).await;
    let err = repo.acknowledge(job_id, true, None).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidState(_)));

    // unknown id is a plain miss
    let err = repo
        .acknowledge(uuid::Uuid::new_v4(), true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NotFound));
}

#[tokio::test]
#[serial]
async fn retry_count_is_monotonic_across_bumps() {
    let Some(pool) = setup_db().await else { return };
    let tenant = create_tenant(&pool, "t1", 5, 10).await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_pending_job(&pool, &tenant.id, 5).await;

    let mut last = 0;
    for _ in 0..3 {
        repo.lease_one(30).await.unwrap().expect("should lease");
        repo.acknowledge(job_id, false, Some("flaky")).await.unwrap();
        let bumped = repo.bump_retry(job_id).await.unwrap();
        assert!(bumped.retry_count > last);
        last = bumped.retry_count;
    }
    assert_eq!(last, 3);
}
