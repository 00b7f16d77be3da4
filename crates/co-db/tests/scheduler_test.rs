use chrono::Utc;
use co_db::models::{ScheduledJobStatus, ScheduledJobType};
use co_db::queries::scheduler::{self, DEFAULT_MAX_ATTEMPTS};
use co_test_utils::TestDb;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[tokio::test]
async fn schedule_with_idempotency_key_is_deduplicated() {
    let db = TestDb::new().await;
    let key = "work-123:pr_feedback";

    let first = scheduler::schedule_task_with_retry(
        &db.pool,
        &new_id(),
        None,
        ScheduledJobType::PrFeedback,
        Utc::now(),
        Some(key),
        serde_json::json!({}),
        DEFAULT_MAX_ATTEMPTS,
    )
    .await
    .unwrap();

    let second = scheduler::schedule_task_with_retry(
        &db.pool,
        &new_id(),
        None,
        ScheduledJobType::PrFeedback,
        Utc::now(),
        Some(key),
        serde_json::json!({}),
        DEFAULT_MAX_ATTEMPTS,
    )
    .await
    .unwrap();

    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn claim_is_compare_and_swap() {
    let db = TestDb::new().await;
    scheduler::schedule_task_with_retry(
        &db.pool,
        &new_id(),
        None,
        ScheduledJobType::GitPush,
        Utc::now() - chrono::Duration::seconds(1),
        None,
        serde_json::json!({}),
        DEFAULT_MAX_ATTEMPTS,
    )
    .await
    .unwrap();

    let claimed = scheduler::get_next_scheduled_task(&db.pool).await.unwrap();
    assert!(claimed.is_some());
    assert_eq!(claimed.unwrap().status, ScheduledJobStatus::Executing);

    // Nothing else is due now.
    let claimed_again = scheduler::get_next_scheduled_task(&db.pool).await.unwrap();
    assert!(claimed_again.is_none());
}

#[tokio::test]
async fn backoff_grows_then_terminally_fails() {
    let db = TestDb::new().await;
    let id = new_id();
    let job = scheduler::schedule_task_with_retry(
        &db.pool,
        &id,
        None,
        ScheduledJobType::GithubComment,
        Utc::now() - chrono::Duration::seconds(1),
        None,
        serde_json::json!({}),
        DEFAULT_MAX_ATTEMPTS,
    )
    .await
    .unwrap();
    assert_eq!(job.max_attempts, 5);

    for _ in 0..4 {
        scheduler::reschedule_with_backoff(&db.pool, &id, "transient error").await.unwrap();
        let job = scheduler::get_job(&db.pool, &id).await.unwrap().unwrap();
        assert_eq!(job.status, ScheduledJobStatus::Pending);
    }

    scheduler::reschedule_with_backoff(&db.pool, &id, "still failing").await.unwrap();
    let job = scheduler::get_job(&db.pool, &id).await.unwrap().unwrap();
    assert_eq!(job.status, ScheduledJobStatus::Failed);
    assert_eq!(job.attempt_count, 5);
}

#[tokio::test]
async fn per_job_max_attempts_overrides_the_default() {
    let db = TestDb::new().await;
    let id = new_id();
    let job = scheduler::schedule_task_with_retry(
        &db.pool,
        &id,
        None,
        ScheduledJobType::GitPush,
        Utc::now() - chrono::Duration::seconds(1),
        None,
        serde_json::json!({}),
        2,
    )
    .await
    .unwrap();
    assert_eq!(job.max_attempts, 2);

    scheduler::reschedule_with_backoff(&db.pool, &id, "transient error").await.unwrap();
    let job = scheduler::get_job(&db.pool, &id).await.unwrap().unwrap();
    assert_eq!(job.status, ScheduledJobStatus::Pending);

    scheduler::reschedule_with_backoff(&db.pool, &id, "still failing").await.unwrap();
    let job = scheduler::get_job(&db.pool, &id).await.unwrap().unwrap();
    assert_eq!(job.status, ScheduledJobStatus::Failed);
    assert_eq!(job.attempt_count, 2);
}
