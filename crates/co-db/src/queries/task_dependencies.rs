//! Database query functions for the `task_dependencies` table.
//!
//! Cycle prevention is the caller's responsibility (a reverse-reachability
//! walk before inserting, see `co-core`'s scheduling module) rather than a
//! database constraint -- SQLite has no native support for verifying DAG
//! acyclicity in a `CHECK` clause.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// Insert a dependency edge: `task_id` depends on `depends_on_task_id`.
/// Idempotent via `ON CONFLICT DO NOTHING`.
pub async fn insert_task_dependency(
    pool: &SqlitePool,
    task_id: &str,
    depends_on_task_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on_task_id) VALUES (?, ?) \
         ON CONFLICT (task_id, depends_on_task_id) DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_task_id)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// The IDs of all tasks that `task_id` depends on.
pub async fn get_task_dependencies(pool: &SqlitePool, task_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// The IDs of all tasks that depend on `task_id` (reverse edges).
pub async fn get_dependent_tasks(pool: &SqlitePool, task_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT task_id FROM task_dependencies WHERE depends_on_task_id = ?",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get dependent tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
