use co_db::models::ScheduledJobType;
use co_db::queries::pr_feedback::FollowUpJob;
use co_db::queries::{pr_feedback, scheduler, works};
use co_test_utils::TestDb;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[tokio::test]
async fn resolving_feedback_atomically_schedules_follow_up() {
    let db = TestDb::new().await;
    let work_id = new_id();
    works::create_work(&db.pool, &work_id, "feature/feedback", "main", None)
        .await
        .unwrap();

    let feedback = pr_feedback::insert_feedback(
        &db.pool,
        &new_id(),
        &work_id,
        "https://example.invalid/pr/1",
        "review_comment",
        "nit: rename variable",
        "please rename `x` to something descriptive",
        "github",
        None,
        "comment-1",
        0,
    )
    .await
    .unwrap();
    assert!(feedback.resolved_at.is_none());

    let job_id = new_id();
    pr_feedback::mark_feedback_resolved_and_schedule_tasks(
        &db.pool,
        &feedback.id,
        &work_id,
        &[FollowUpJob {
            id: &job_id,
            task_type: ScheduledJobType::CommentResolution,
            idempotency_key: None,
        }],
    )
    .await
    .unwrap();

    let unresolved = pr_feedback::list_unresolved_feedback(&db.pool, &work_id).await.unwrap();
    assert!(unresolved.is_empty());

    let job = scheduler::get_job(&db.pool, &job_id).await.unwrap().expect("follow-up job should exist");
    assert_eq!(job.task_type, ScheduledJobType::CommentResolution);

    // Resolving the same feedback twice is rejected, not silently repeated.
    let result = pr_feedback::mark_feedback_resolved_and_schedule_tasks(
        &db.pool,
        &feedback.id,
        &work_id,
        &[FollowUpJob {
            id: &new_id(),
            task_type: ScheduledJobType::CommentResolution,
            idempotency_key: None,
        }],
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn resolving_feedback_schedules_multiple_follow_ups_idempotently() {
    let db = TestDb::new().await;
    let work_id = new_id();
    works::create_work(&db.pool, &work_id, "feature/multi-feedback", "main", None)
        .await
        .unwrap();

    let feedback = pr_feedback::insert_feedback(
        &db.pool,
        &new_id(),
        &work_id,
        "https://example.invalid/pr/2",
        "ci_failure",
        "lint and tests both failed",
        "two separate CI jobs reported failures",
        "ci",
        None,
        "run-99",
        1,
    )
    .await
    .unwrap();

    let lint_job_id = new_id();
    let test_job_id = new_id();
    let idempotency_key = format!("feedback-resolution:{}", feedback.id);

    let jobs = vec![
        FollowUpJob {
            id: &lint_job_id,
            task_type: ScheduledJobType::CommentResolution,
            idempotency_key: Some(&idempotency_key),
        },
        FollowUpJob {
            id: &test_job_id,
            task_type: ScheduledJobType::GitPush,
            idempotency_key: None,
        },
    ];
    pr_feedback::mark_feedback_resolved_and_schedule_tasks(&db.pool, &feedback.id, &work_id, &jobs)
        .await
        .unwrap();

    assert!(scheduler::get_job(&db.pool, &lint_job_id).await.unwrap().is_some());
    assert!(scheduler::get_job(&db.pool, &test_job_id).await.unwrap().is_some());

    // Re-running the same idempotency key (as a crash-recovery replay would) does not
    // insert a second lint-fix job, but a fresh job with no key still goes through.
    let retry_job_id = new_id();
    let other_feedback = pr_feedback::insert_feedback(
        &db.pool,
        &new_id(),
        &work_id,
        "https://example.invalid/pr/2",
        "ci_failure",
        "unrelated failure",
        "a third CI job failed independently",
        "ci",
        None,
        "run-100",
        1,
    )
    .await
    .unwrap();
    pr_feedback::mark_feedback_resolved_and_schedule_tasks(
        &db.pool,
        &other_feedback.id,
        &work_id,
        &[FollowUpJob {
            id: &retry_job_id,
            task_type: ScheduledJobType::CommentResolution,
            idempotency_key: Some(&idempotency_key),
        }],
    )
    .await
    .unwrap();
    assert!(scheduler::get_job(&db.pool, &retry_job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_feedback_ingestion_is_idempotent() {
    let db = TestDb::new().await;
    let work_id = new_id();
    works::create_work(&db.pool, &work_id, "feature/dup", "main", None)
        .await
        .unwrap();

    let first = pr_feedback::insert_feedback(
        &db.pool,
        &new_id(),
        &work_id,
        "https://example.invalid/pr/1",
        "ci_failure",
        "tests failed",
        "lint job failed",
        "ci",
        None,
        "run-42",
        1,
    )
    .await
    .unwrap();

    let second = pr_feedback::insert_feedback(
        &db.pool,
        &new_id(),
        &work_id,
        "https://example.invalid/pr/1",
        "ci_failure",
        "tests failed",
        "lint job failed",
        "ci",
        None,
        "run-42",
        1,
    )
    .await
    .unwrap();

    assert_eq!(first.id, second.id);
}
