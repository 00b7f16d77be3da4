//! Database query functions for the `work_beads` table and the bead group
//! counter.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::WorkBead;

/// Atomically reserve the next bead group id. Backed by a single-row counter
/// table rather than `AUTOINCREMENT` so group ids can be reserved before any
/// `work_beads` row referencing them exists.
pub async fn get_next_bead_group_id(pool: &SqlitePool) -> Result<i64> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let (current,): (i64,) =
        sqlx::query_as("SELECT next_value FROM bead_group_counter WHERE id = 1")
            .fetch_one(&mut *tx)
            .await
            .context("failed to read bead group counter")?;

    sqlx::query("UPDATE bead_group_counter SET next_value = next_value + 1 WHERE id = 1")
        .execute(&mut *tx)
        .await
        .context("failed to advance bead group counter")?;

    tx.commit().await.context("failed to commit bead group counter reservation")?;

    Ok(current)
}

/// Attach a batch of beads to a work under one group id, at sequential
/// positions starting from the current max. The whole batch is rejected
/// (the transaction rolls back) if any bead in it is already attached to
/// the work, so callers never observe a partially-added group.
pub async fn add_work_beads(pool: &SqlitePool, work_id: &str, bead_ids: &[String], group_id: i64) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let (start_position,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM work_beads WHERE work_id = ?",
    )
    .bind(work_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to compute next work_beads position")?;

    for (offset, bead_id) in bead_ids.iter().enumerate() {
        sqlx::query(
            "INSERT INTO work_beads (work_id, bead_id, group_id, position) VALUES (?, ?, ?, ?)",
        )
        .bind(work_id)
        .bind(bead_id)
        .bind(group_id)
        .bind(start_position + offset as i64)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to add bead {bead_id} to work {work_id} (batch rejected)"))?;
    }

    tx.commit().await.context("failed to commit work beads batch")?;

    Ok(())
}

pub async fn list_work_beads(pool: &SqlitePool, work_id: &str) -> Result<Vec<WorkBead>> {
    let beads = sqlx::query_as::<_, WorkBead>(
        "SELECT * FROM work_beads WHERE work_id = ? ORDER BY position ASC",
    )
    .bind(work_id)
    .fetch_all(pool)
    .await
    .context("failed to list work beads")?;

    Ok(beads)
}
