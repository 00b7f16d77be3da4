//! Database query functions for the `task_beads` join table.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::TaskBeadStatus;

/// Attach a bead to a task. Idempotent: re-attaching an already-linked bead
/// is a no-op.
pub async fn add_task_bead(pool: &SqlitePool, task_id: &str, bead_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_beads (task_id, bead_id) VALUES (?, ?) \
         ON CONFLICT (task_id, bead_id) DO NOTHING",
    )
    .bind(task_id)
    .bind(bead_id)
    .execute(pool)
    .await
    .context("failed to add task bead")?;

    Ok(())
}

pub async fn complete_task_bead(pool: &SqlitePool, task_id: &str, bead_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_beads SET status = 'completed' \
         WHERE task_id = ? AND bead_id = ? AND status = 'pending'",
    )
    .bind(task_id)
    .bind(bead_id)
    .execute(pool)
    .await
    .context("failed to complete task bead")?;

    Ok(result.rows_affected())
}

pub async fn fail_task_bead(pool: &SqlitePool, task_id: &str, bead_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_beads SET status = 'failed' \
         WHERE task_id = ? AND bead_id = ? AND status = 'pending'",
    )
    .bind(task_id)
    .bind(bead_id)
    .execute(pool)
    .await
    .context("failed to fail task bead")?;

    Ok(result.rows_affected())
}

/// Status counts for a task's attached beads.
#[derive(Debug, Clone, Default)]
pub struct TaskBeadCounts {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

pub async fn count_task_bead_statuses(pool: &SqlitePool, task_id: &str) -> Result<TaskBeadCounts> {
    let rows: Vec<(TaskBeadStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM task_beads WHERE task_id = ? GROUP BY status",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to count task bead statuses")?;

    let mut counts = TaskBeadCounts::default();
    for (status, count) in rows {
        match status {
            TaskBeadStatus::Pending => counts.pending = count,
            TaskBeadStatus::Completed => counts.completed = count,
            TaskBeadStatus::Failed => counts.failed = count,
        }
        counts.total += count;
    }
    Ok(counts)
}

/// If every bead attached to `task_id` is `completed` and the task is
/// still `processing`, transition it to `completed`. A task with any
/// `failed` bead stays open -- failure surfaces through review, not
/// through a silent "done" report.
///
/// Returns `true` if this call performed the transition.
pub async fn check_and_complete_task(pool: &SqlitePool, task_id: &str) -> Result<bool> {
    let counts = count_task_bead_statuses(pool, task_id).await?;
    if counts.total == 0 || counts.completed != counts.total {
        return Ok(false);
    }

    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = ? AND status = 'processing'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to auto-complete task from beads")?;

    Ok(result.rows_affected() > 0)
}
