//! Database query functions for the `tasks` and `work_tasks` tables.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::{Task, TaskStatus, TaskType};

/// Insert a new task row, attach it to a work at the given position, and
/// link every bead in `bead_ids` to it. All three happen in one transaction
/// so a task is never left unreachable from its work's ordered list, and
/// never left with a partial set of attached beads.
pub async fn create_task(
    pool: &SqlitePool,
    id: &str,
    work_id: &str,
    task_type: TaskType,
    bead_ids: &[String],
    complexity_budget: Option<i64>,
    position: i64,
) -> Result<Task> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (id, work_id, task_type, complexity_budget) \
         VALUES (?, ?, ?, ?) \
         RETURNING *",
    )
    .bind(id)
    .bind(work_id)
    .bind(task_type)
    .bind(complexity_budget)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert task")?;

    sqlx::query("INSERT INTO work_tasks (work_id, task_id, position) VALUES (?, ?, ?)")
        .bind(work_id)
        .bind(id)
        .bind(position)
        .execute(&mut *tx)
        .await
        .context("failed to attach task to work")?;

    for bead_id in bead_ids {
        sqlx::query(
            "INSERT INTO task_beads (task_id, bead_id) VALUES (?, ?) \
             ON CONFLICT (task_id, bead_id) DO NOTHING",
        )
        .bind(id)
        .bind(bead_id)
        .execute(&mut *tx)
        .await
        .context("failed to attach bead to task")?;
    }

    tx.commit().await.context("failed to commit task creation")?;

    Ok(task)
}

pub async fn get_task(pool: &SqlitePool, id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

pub async fn list_tasks_for_work(pool: &SqlitePool, work_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* FROM tasks t \
         JOIN work_tasks wt ON wt.task_id = t.id \
         WHERE wt.work_id = ? \
         ORDER BY wt.position ASC",
    )
    .bind(work_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for work")?;

    Ok(tasks)
}

/// Atomically transition a task from one status to another, optimistically
/// locked on the current status. Returns the number of rows affected (0
/// means the status did not match and the caller should re-read).
pub async fn transition_task_status(
    pool: &SqlitePool,
    task_id: &str,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = ?, \
             started_at = CASE WHEN ? = 'processing' THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now') ELSE started_at END, \
             completed_at = CASE WHEN ? IN ('completed', 'failed') THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now') ELSE completed_at END, \
             last_activity = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = ? AND status = ?",
    )
    .bind(to)
    .bind(to)
    .bind(to)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

pub async fn start_task(pool: &SqlitePool, task_id: &str) -> Result<u64> {
    transition_task_status(pool, task_id, TaskStatus::Pending, TaskStatus::Processing).await
}

pub async fn complete_task(pool: &SqlitePool, task_id: &str) -> Result<u64> {
    transition_task_status(pool, task_id, TaskStatus::Processing, TaskStatus::Completed).await
}

pub async fn fail_task(pool: &SqlitePool, task_id: &str, error_message: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', error_message = ?, completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = ? AND status = 'processing'",
    )
    .bind(error_message)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to fail task")?;

    Ok(result.rows_affected())
}

pub async fn set_actual_complexity(pool: &SqlitePool, task_id: &str, complexity: i64) -> Result<()> {
    sqlx::query("UPDATE tasks SET actual_complexity = ? WHERE id = ?")
        .bind(complexity)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set task actual complexity")?;
    Ok(())
}

pub async fn set_task_pr_url(pool: &SqlitePool, task_id: &str, pr_url: &str) -> Result<()> {
    sqlx::query("UPDATE tasks SET pr_url = ? WHERE id = ?")
        .bind(pr_url)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set task PR URL")?;
    Ok(())
}

pub async fn touch_last_activity(pool: &SqlitePool, task_id: &str) -> Result<()> {
    sqlx::query("UPDATE tasks SET last_activity = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?")
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to touch task last_activity")?;
    Ok(())
}

pub async fn mark_spawned(pool: &SqlitePool, task_id: &str, spawn_status: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET spawned_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), spawn_status = ? WHERE id = ?",
    )
    .bind(spawn_status)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to mark task spawned")?;
    Ok(())
}

/// Whether `task_id` has any dependency whose own status is not `completed`.
pub async fn has_pending_dependencies(pool: &SqlitePool, task_id: &str) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM task_dependencies td \
         JOIN tasks dep ON dep.id = td.depends_on_task_id \
         WHERE td.task_id = ? AND dep.status != 'completed'",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to check pending dependencies")?;

    Ok(row.0 > 0)
}

/// All tasks for a work that are `pending` and whose dependencies (if any)
/// are all `completed` -- i.e. ready to be dispatched by the orchestrator.
pub async fn ready_tasks_for_work(pool: &SqlitePool, work_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* \
         FROM tasks t \
         JOIN work_tasks wt ON wt.task_id = t.id \
         WHERE wt.work_id = ? \
           AND t.status = 'pending' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on_task_id \
               WHERE td.task_id = t.id AND dep.status != 'completed' \
           ) \
         ORDER BY wt.position ASC",
    )
    .bind(work_id)
    .fetch_all(pool)
    .await
    .context("failed to get ready tasks for work")?;

    Ok(tasks)
}

/// Status counts for a work's tasks.
#[derive(Debug, Clone, Default)]
pub struct WorkProgress {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

pub async fn get_work_progress(pool: &SqlitePool, work_id: &str) -> Result<WorkProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT t.status, COUNT(*) \
         FROM tasks t \
         JOIN work_tasks wt ON wt.task_id = t.id \
         WHERE wt.work_id = ? \
         GROUP BY t.status",
    )
    .bind(work_id)
    .fetch_all(pool)
    .await
    .context("failed to get work progress")?;

    let mut progress = WorkProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "processing" => progress.processing = *count,
            "completed" => progress.completed = *count,
            "failed" => progress.failed = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Whether every task in a work (including manual, non-auto-workflow tasks)
/// is `completed`.
pub async fn is_work_complete(pool: &SqlitePool, work_id: &str) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks t \
         JOIN work_tasks wt ON wt.task_id = t.id \
         WHERE wt.work_id = ? AND t.status != 'completed'",
    )
    .bind(work_id)
    .fetch_one(pool)
    .await
    .context("failed to check work completion")?;

    Ok(row.0 == 0)
}

/// Reset tasks stuck in `processing` back to `pending` so the DAG
/// scheduler picks them up again on the next dispatch pass. Used by the
/// recovery subsystem's startup reconciliation after a crash left a
/// process's tasks in limbo -- there is no attempt budget here, a task
/// that was mid-flight when its supervisor died simply runs again.
pub async fn reset_processing_tasks_to_pending(pool: &SqlitePool, work_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'pending', \
             started_at = NULL, \
             last_activity = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE work_id = ? AND status = 'processing' \
         RETURNING *",
    )
    .bind(work_id)
    .fetch_all(pool)
    .await
    .context("failed to reset processing tasks to pending")?;

    Ok(tasks)
}

/// Reset a failed task back to `pending` so the DAG scheduler's
/// `ready_tasks_for_work` picks it up again.
pub async fn retry_task_to_pending(pool: &SqlitePool, task_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', \
             error_message = NULL, \
             started_at = NULL, \
             completed_at = NULL \
         WHERE id = ? AND status = 'failed'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to retry task to pending")?;

    Ok(result.rows_affected())
}

/// Upsert a single `task_metadata` key/value pair.
pub async fn set_task_metadata(pool: &SqlitePool, task_id: &str, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_metadata (task_id, key, value) VALUES (?, ?, ?) \
         ON CONFLICT (task_id, key) DO UPDATE SET value = excluded.value",
    )
    .bind(task_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("failed to set task metadata")?;
    Ok(())
}

/// Read a task's `auto_workflow` metadata flag (defaults to `true` when
/// absent).
pub async fn is_auto_workflow(pool: &SqlitePool, task_id: &str) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT value FROM task_metadata WHERE task_id = ? AND key = 'auto_workflow'",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to read auto_workflow metadata")?;

    Ok(match row {
        Some((value,)) => value != "false",
        None => true,
    })
}
