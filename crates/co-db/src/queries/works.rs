//! Database query functions for the `works` table.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::{Work, WorkStatus};

/// Insert a new work row. Returns the inserted row with server-generated
/// defaults (status, created_at).
pub async fn create_work(
    pool: &SqlitePool,
    id: &str,
    branch_name: &str,
    base_branch: &str,
    root_issue_id: Option<&str>,
) -> Result<Work> {
    let work = sqlx::query_as::<_, Work>(
        "INSERT INTO works (id, branch_name, base_branch, root_issue_id) \
         VALUES (?, ?, ?, ?) \
         RETURNING *",
    )
    .bind(id)
    .bind(branch_name)
    .bind(base_branch)
    .bind(root_issue_id)
    .fetch_one(pool)
    .await
    .context("failed to insert work")?;

    Ok(work)
}

pub async fn get_work(pool: &SqlitePool, id: &str) -> Result<Option<Work>> {
    let work = sqlx::query_as::<_, Work>("SELECT * FROM works WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch work")?;

    Ok(work)
}

pub async fn list_works(pool: &SqlitePool, status: Option<WorkStatus>) -> Result<Vec<Work>> {
    let works = match status {
        Some(status) => {
            sqlx::query_as::<_, Work>(
                "SELECT * FROM works WHERE status = ? ORDER BY created_at ASC",
            )
            .bind(status)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Work>("SELECT * FROM works ORDER BY created_at ASC")
                .fetch_all(pool)
                .await
        }
    }
    .context("failed to list works")?;

    Ok(works)
}

/// Atomically transition a work's status with optimistic locking: the
/// `WHERE` clause includes `status = ?from`, so the update only applies if
/// the row hasn't moved since the caller last read it.
pub async fn transition_work_status(
    pool: &SqlitePool,
    work_id: &str,
    from: WorkStatus,
    to: WorkStatus,
) -> Result<u64> {
    let extra_clause = match to {
        WorkStatus::Processing => {
            ", started_at = COALESCE(started_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))"
        }
        WorkStatus::Completed | WorkStatus::Failed | WorkStatus::Merged => {
            ", completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
        }
        _ => "",
    };

    let sql = format!("UPDATE works SET status = ?{extra_clause} WHERE id = ? AND status = ?");

    let result = sqlx::query(&sql)
        .bind(to)
        .bind(work_id)
        .bind(from)
        .execute(pool)
        .await
        .context("failed to transition work status")?;

    Ok(result.rows_affected())
}

pub async fn set_worktree_path(pool: &SqlitePool, work_id: &str, path: &str) -> Result<()> {
    sqlx::query("UPDATE works SET worktree_path = ? WHERE id = ?")
        .bind(path)
        .bind(work_id)
        .execute(pool)
        .await
        .context("failed to set work worktree path")?;
    Ok(())
}

pub async fn set_pr_url(pool: &SqlitePool, work_id: &str, pr_url: &str) -> Result<()> {
    sqlx::query("UPDATE works SET pr_url = ? WHERE id = ?")
        .bind(pr_url)
        .bind(work_id)
        .execute(pool)
        .await
        .context("failed to set work PR URL")?;
    Ok(())
}
