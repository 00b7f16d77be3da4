//! Database query functions for the append-only `recovery_events` audit log.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::{RecoveryEvent, RecoveryEventType};

#[allow(clippy::too_many_arguments)]
pub async fn insert_recovery_event(
    pool: &SqlitePool,
    event_type: RecoveryEventType,
    task_id: Option<&str>,
    work_id: Option<&str>,
    bead_id: Option<&str>,
    reason: &str,
    details: serde_json::Value,
) -> Result<RecoveryEvent> {
    let event = sqlx::query_as::<_, RecoveryEvent>(
        "INSERT INTO recovery_events (event_type, task_id, work_id, bead_id, reason, details) \
         VALUES (?, ?, ?, ?, ?, ?) \
         RETURNING *",
    )
    .bind(event_type)
    .bind(task_id)
    .bind(work_id)
    .bind(bead_id)
    .bind(reason)
    .bind(details)
    .fetch_one(pool)
    .await
    .context("failed to insert recovery event")?;

    Ok(event)
}

pub async fn list_recovery_events_for_work(pool: &SqlitePool, work_id: &str) -> Result<Vec<RecoveryEvent>> {
    let events = sqlx::query_as::<_, RecoveryEvent>(
        "SELECT * FROM recovery_events WHERE work_id = ? ORDER BY created_at ASC",
    )
    .bind(work_id)
    .fetch_all(pool)
    .await
    .context("failed to list recovery events for work")?;

    Ok(events)
}
