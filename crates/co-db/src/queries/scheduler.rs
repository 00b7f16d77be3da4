//! Database query functions for the `scheduled_jobs` durable job queue.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{ScheduledJob, ScheduledJobType};

/// The scheduler never runs a job sooner than this after it is enqueued,
/// even when a caller wants to act on the associated state change
/// immediately: the gap guarantees the drain loop can't race an inline
/// execution of the same job and run it twice.
pub const OPTIMISTIC_EXECUTION_DELAY_SECS: i64 = 30;

/// A job type's default retry budget when a caller has no stronger opinion.
/// Matches the `scheduled_jobs.max_attempts` column default.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

/// Enqueue a job, deduplicated by `idempotency_key`: if a row with the same
/// key already exists, this is a no-op and the existing row is returned.
#[allow(clippy::too_many_arguments)]
pub async fn schedule_task_with_retry(
    pool: &SqlitePool,
    id: &str,
    work_id: Option<&str>,
    task_type: ScheduledJobType,
    scheduled_at: DateTime<Utc>,
    idempotency_key: Option<&str>,
    metadata: serde_json::Value,
    max_attempts: i64,
) -> Result<ScheduledJob> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = get_by_idempotency_key(pool, key).await? {
            return Ok(existing);
        }
    }

    let job = sqlx::query_as::<_, ScheduledJob>(
        "INSERT INTO scheduled_jobs (id, work_id, task_type, scheduled_at, idempotency_key, metadata, max_attempts) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (idempotency_key) DO NOTHING \
         RETURNING *",
    )
    .bind(id)
    .bind(work_id)
    .bind(task_type)
    .bind(scheduled_at)
    .bind(idempotency_key)
    .bind(metadata)
    .bind(max_attempts)
    .fetch_optional(pool)
    .await
    .context("failed to schedule job")?;

    match job {
        Some(job) => Ok(job),
        // Lost the race against a concurrent insert of the same idempotency key.
        None => {
            let key = idempotency_key.expect("conflict without an idempotency key is impossible");
            get_by_idempotency_key(pool, key)
                .await?
                .context("job vanished after idempotency conflict")
        }
    }
}

async fn get_by_idempotency_key(pool: &SqlitePool, key: &str) -> Result<Option<ScheduledJob>> {
    let job = sqlx::query_as::<_, ScheduledJob>(
        "SELECT * FROM scheduled_jobs WHERE idempotency_key = ?",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
    .context("failed to look up job by idempotency key")?;

    Ok(job)
}

/// Push out (or insert, if absent) the single pending job of a given type
/// for a work -- used by debounced follow-ups like `pr_feedback` polling
/// where repeated triggers should coalesce into one future run rather than
/// queue N runs.
pub async fn schedule_or_update_task(
    pool: &SqlitePool,
    id: &str,
    work_id: &str,
    task_type: ScheduledJobType,
    scheduled_at: DateTime<Utc>,
) -> Result<ScheduledJob> {
    let existing = sqlx::query_as::<_, ScheduledJob>(
        "SELECT * FROM scheduled_jobs \
         WHERE work_id = ? AND task_type = ? AND status = 'pending'",
    )
    .bind(work_id)
    .bind(task_type)
    .fetch_optional(pool)
    .await
    .context("failed to look up pending job")?;

    if let Some(existing) = existing {
        sqlx::query("UPDATE scheduled_jobs SET scheduled_at = ? WHERE id = ?")
            .bind(scheduled_at)
            .bind(&existing.id)
            .execute(pool)
            .await
            .context("failed to update scheduled job time")?;
        return get_job(pool, &existing.id)
            .await?
            .context("scheduled job vanished after update");
    }

    let job = sqlx::query_as::<_, ScheduledJob>(
        "INSERT INTO scheduled_jobs (id, work_id, task_type, scheduled_at) \
         VALUES (?, ?, ?, ?) \
         RETURNING *",
    )
    .bind(id)
    .bind(work_id)
    .bind(task_type)
    .bind(scheduled_at)
    .fetch_one(pool)
    .await
    .context("failed to insert scheduled job")?;

    Ok(job)
}

pub async fn get_job(pool: &SqlitePool, id: &str) -> Result<Option<ScheduledJob>> {
    let job = sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch scheduled job")?;

    Ok(job)
}

/// Pull a pending job's `scheduled_at` to now, so the next drain pass picks
/// it up immediately instead of waiting out its delay.
pub async fn trigger_task_now(pool: &SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE scheduled_jobs SET scheduled_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to trigger job")?;

    Ok(result.rows_affected())
}

/// Claim the earliest due pending job via an optimistic-locked CAS
/// (`pending -> executing`), so two concurrent drain loops never claim the
/// same row.
pub async fn get_next_scheduled_task(pool: &SqlitePool) -> Result<Option<ScheduledJob>> {
    let candidate: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM scheduled_jobs \
         WHERE status = 'pending' AND scheduled_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         ORDER BY scheduled_at ASC \
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("failed to find next scheduled job")?;

    let Some((id,)) = candidate else {
        return Ok(None);
    };

    let claimed = sqlx::query_as::<_, ScheduledJob>(
        "UPDATE scheduled_jobs SET status = 'executing' \
         WHERE id = ? AND status = 'pending' \
         RETURNING *",
    )
    .bind(&id)
    .fetch_optional(pool)
    .await
    .context("failed to claim scheduled job")?;

    // `None` means another drain loop claimed it first; the caller just
    // tries again on its next tick.
    Ok(claimed)
}

pub async fn mark_task_completed(pool: &SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE scheduled_jobs \
         SET status = 'completed', executed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = ? AND status = 'executing'",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark job completed")?;

    Ok(result.rows_affected())
}

pub async fn mark_task_completed_by_idempotency_key(pool: &SqlitePool, key: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE scheduled_jobs \
         SET status = 'completed', executed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE idempotency_key = ? AND status IN ('pending', 'executing')",
    )
    .bind(key)
    .execute(pool)
    .await
    .context("failed to mark job completed by idempotency key")?;

    Ok(result.rows_affected())
}

/// Reschedule a failed job with exponential backoff, or mark it terminally
/// `failed` once it has exhausted `max_attempts`. Delay is
/// `min(30 * 2^attempt, 600)` seconds.
pub async fn reschedule_with_backoff(pool: &SqlitePool, id: &str, error_message: &str) -> Result<()> {
    let job = get_job(pool, id)
        .await?
        .with_context(|| format!("job {id} not found"))?;

    let next_attempt = job.attempt_count + 1;

    if next_attempt >= job.max_attempts {
        sqlx::query(
            "UPDATE scheduled_jobs \
             SET status = 'failed', attempt_count = ?, error_message = ? \
             WHERE id = ?",
        )
        .bind(next_attempt)
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark job terminally failed")?;
        return Ok(());
    }

    let delay_secs = (30i64 * 2i64.pow(next_attempt as u32)).min(600);

    sqlx::query(
        "UPDATE scheduled_jobs \
         SET status = 'pending', \
             attempt_count = ?, \
             error_message = ?, \
             scheduled_at = datetime(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ? || ' seconds') \
         WHERE id = ?",
    )
    .bind(next_attempt)
    .bind(error_message)
    .bind(delay_secs.to_string())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to reschedule job with backoff")?;

    Ok(())
}

/// Delete completed or terminally-failed jobs older than `older_than`.
/// Returns the number of rows removed.
pub async fn cleanup_old_tasks(pool: &SqlitePool, older_than: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM scheduled_jobs \
         WHERE status IN ('completed', 'failed') AND created_at < ?",
    )
    .bind(older_than)
    .execute(pool)
    .await
    .context("failed to clean up old scheduled jobs")?;

    Ok(result.rows_affected())
}
