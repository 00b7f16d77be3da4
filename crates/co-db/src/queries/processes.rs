//! Database query functions for the `processes` liveness registry.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{Process, ProcessType};

/// Register a process. The unique partial indexes on `processes` enforce
/// the singleton-control-plane and one-orchestrator-per-work invariants --
/// a duplicate registration surfaces as a unique constraint violation, which
/// callers should treat as "someone else is already live for this role".
pub async fn register_process(
    pool: &SqlitePool,
    id: &str,
    process_type: ProcessType,
    work_id: Option<&str>,
    pid: i64,
    hostname: &str,
) -> Result<Process> {
    let process = sqlx::query_as::<_, Process>(
        "INSERT INTO processes (id, process_type, work_id, pid, hostname, heartbeat) \
         VALUES (?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
         RETURNING *",
    )
    .bind(id)
    .bind(process_type)
    .bind(work_id)
    .bind(pid)
    .bind(hostname)
    .fetch_one(pool)
    .await
    .context("failed to register process")?;

    Ok(process)
}

pub async fn heartbeat(pool: &SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE processes SET heartbeat = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record heartbeat")?;

    Ok(result.rows_affected())
}

pub async fn get_process_for_work(pool: &SqlitePool, work_id: &str) -> Result<Option<Process>> {
    let process = sqlx::query_as::<_, Process>(
        "SELECT * FROM processes WHERE work_id = ? AND process_type = 'orchestrator'",
    )
    .bind(work_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch orchestrator process for work")?;

    Ok(process)
}

pub async fn get_control_plane(pool: &SqlitePool) -> Result<Option<Process>> {
    let process = sqlx::query_as::<_, Process>(
        "SELECT * FROM processes WHERE process_type = 'control_plane'",
    )
    .fetch_optional(pool)
    .await
    .context("failed to fetch control plane process")?;

    Ok(process)
}

/// Whether a fresh orchestrator is already live for `work_id`: true if a
/// row exists whose heartbeat is newer than `staleness_cutoff`.
pub async fn has_live_orchestrator(pool: &SqlitePool, work_id: &str, staleness_cutoff: DateTime<Utc>) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM processes \
         WHERE work_id = ? AND process_type = 'orchestrator' AND heartbeat > ?",
    )
    .bind(work_id)
    .bind(staleness_cutoff)
    .fetch_one(pool)
    .await
    .context("failed to check for a live orchestrator")?;

    Ok(row.0 > 0)
}

pub async fn list_stale_processes(pool: &SqlitePool, staleness_cutoff: DateTime<Utc>) -> Result<Vec<Process>> {
    let rows = sqlx::query_as::<_, Process>("SELECT * FROM processes WHERE heartbeat <= ?")
        .bind(staleness_cutoff)
        .fetch_all(pool)
        .await
        .context("failed to list stale processes")?;

    Ok(rows)
}

pub async fn remove_process(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM processes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to remove process")?;
    Ok(())
}
