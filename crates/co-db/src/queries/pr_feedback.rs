//! Database query functions for the `pr_feedback` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{PrFeedback, ScheduledJobType};

/// Record an inbound piece of PR feedback (a review comment, a CI failure).
/// Deduplicated on `(work_id, source, source_id)`: re-ingesting the same
/// comment is a no-op and returns the existing row.
#[allow(clippy::too_many_arguments)]
pub async fn insert_feedback(
    pool: &SqlitePool,
    id: &str,
    work_id: &str,
    pr_url: &str,
    feedback_type: &str,
    title: &str,
    description: &str,
    source: &str,
    source_url: Option<&str>,
    source_id: &str,
    priority: i64,
) -> Result<PrFeedback> {
    let inserted = sqlx::query_as::<_, PrFeedback>(
        "INSERT INTO pr_feedback \
            (id, work_id, pr_url, feedback_type, title, description, source, source_url, source_id, priority) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (work_id, source, source_id) DO NOTHING \
         RETURNING *",
    )
    .bind(id)
    .bind(work_id)
    .bind(pr_url)
    .bind(feedback_type)
    .bind(title)
    .bind(description)
    .bind(source)
    .bind(source_url)
    .bind(source_id)
    .bind(priority)
    .fetch_optional(pool)
    .await
    .context("failed to insert PR feedback")?;

    match inserted {
        Some(row) => Ok(row),
        None => get_by_source(pool, work_id, source, source_id)
            .await?
            .context("PR feedback vanished after conflict"),
    }
}

async fn get_by_source(
    pool: &SqlitePool,
    work_id: &str,
    source: &str,
    source_id: &str,
) -> Result<Option<PrFeedback>> {
    let row = sqlx::query_as::<_, PrFeedback>(
        "SELECT * FROM pr_feedback WHERE work_id = ? AND source = ? AND source_id = ?",
    )
    .bind(work_id)
    .bind(source)
    .bind(source_id)
    .fetch_optional(pool)
    .await
    .context("failed to look up PR feedback by source")?;

    Ok(row)
}

/// Record the triage bead created for a piece of feedback, so comment
/// resolution can later ask the issue tracker whether it closed.
pub async fn set_feedback_bead_id(pool: &SqlitePool, feedback_id: &str, bead_id: &str) -> Result<()> {
    sqlx::query("UPDATE pr_feedback SET bead_id = ? WHERE id = ?")
        .bind(bead_id)
        .bind(feedback_id)
        .execute(pool)
        .await
        .context("failed to set feedback triage bead")?;
    Ok(())
}

pub async fn list_unresolved_feedback(pool: &SqlitePool, work_id: &str) -> Result<Vec<PrFeedback>> {
    let rows = sqlx::query_as::<_, PrFeedback>(
        "SELECT * FROM pr_feedback \
         WHERE work_id = ? AND resolved_at IS NULL \
         ORDER BY priority DESC, created_at ASC",
    )
    .bind(work_id)
    .fetch_all(pool)
    .await
    .context("failed to list unresolved PR feedback")?;

    Ok(rows)
}

/// One follow-up job to enqueue alongside a feedback resolution.
/// `idempotency_key` lets a caller re-run the same resolution request
/// (e.g. after a crash before the transaction's effects were observed)
/// without double-scheduling the follow-up.
pub struct FollowUpJob<'a> {
    pub id: &'a str,
    pub task_type: ScheduledJobType,
    pub idempotency_key: Option<&'a str>,
}

/// The transactional outbox: mark a piece of feedback resolved and enqueue
/// zero or more follow-up tasks (e.g. an `implement` pass addressing a
/// review comment, a `fix_ci` pass addressing a CI failure) in the same
/// transaction, so an observer never sees "resolved" without the
/// follow-up work also being durably scheduled.
pub async fn mark_feedback_resolved_and_schedule_tasks(
    pool: &SqlitePool,
    feedback_id: &str,
    work_id: &str,
    follow_up_jobs: &[FollowUpJob<'_>],
) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let result = sqlx::query(
        "UPDATE pr_feedback SET resolved_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = ? AND resolved_at IS NULL",
    )
    .bind(feedback_id)
    .execute(&mut *tx)
    .await
    .context("failed to mark feedback resolved")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("feedback {feedback_id} already resolved or not found");
    }

    let scheduled_at = Utc::now()
        + chrono::Duration::seconds(super::scheduler::OPTIMISTIC_EXECUTION_DELAY_SECS);

    for job in follow_up_jobs {
        if let Some(key) = job.idempotency_key {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT id FROM scheduled_jobs WHERE idempotency_key = ?")
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("failed to check follow-up job idempotency key")?;
            if existing.is_some() {
                continue;
            }
        }

        sqlx::query(
            "INSERT INTO scheduled_jobs (id, work_id, task_type, scheduled_at, idempotency_key) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job.id)
        .bind(work_id)
        .bind(job.task_type)
        .bind(scheduled_at)
        .bind(job.idempotency_key)
        .execute(&mut *tx)
        .await
        .context("failed to schedule follow-up job")?;
    }

    tx.commit()
        .await
        .context("failed to commit feedback resolution and follow-up scheduling")?;

    Ok(())
}
