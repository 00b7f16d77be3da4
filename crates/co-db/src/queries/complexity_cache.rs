//! Database query functions for the `complexity_cache` table.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::ComplexityCache;

/// Look up a cached complexity estimate, scoped by the bead's current
/// description hash -- a stale cache entry (hash mismatch, because the bead
/// was edited) is treated as a miss.
pub async fn get_cached_complexity(
    pool: &SqlitePool,
    bead_id: &str,
    description_hash: &str,
) -> Result<Option<ComplexityCache>> {
    let row = sqlx::query_as::<_, ComplexityCache>(
        "SELECT * FROM complexity_cache WHERE bead_id = ? AND description_hash = ?",
    )
    .bind(bead_id)
    .bind(description_hash)
    .fetch_optional(pool)
    .await
    .context("failed to read complexity cache")?;

    Ok(row)
}

pub async fn upsert_complexity(
    pool: &SqlitePool,
    bead_id: &str,
    description_hash: &str,
    complexity_score: f64,
    estimated_tokens: i64,
) -> Result<ComplexityCache> {
    let row = sqlx::query_as::<_, ComplexityCache>(
        "INSERT INTO complexity_cache (bead_id, description_hash, complexity_score, estimated_tokens) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (bead_id) DO UPDATE SET \
            description_hash = excluded.description_hash, \
            complexity_score = excluded.complexity_score, \
            estimated_tokens = excluded.estimated_tokens \
         RETURNING *",
    )
    .bind(bead_id)
    .bind(description_hash)
    .bind(complexity_score)
    .bind(estimated_tokens)
    .fetch_one(pool)
    .await
    .context("failed to upsert complexity cache")?;

    Ok(row)
}
