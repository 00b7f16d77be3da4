//! Recovery (C8): startup reconciliation of stuck `processing` tasks and
//! the periodic stale-fail reaper.
//!
//! Walks every orphaned `processing` task's `task_beads` against the
//! issue tracker's authoritative state and emits an audit trail in
//! `recovery_events`.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use co_db::models::RecoveryEventType;
use co_db::queries::{recovery_events, task_beads, tasks};

use crate::error::{classify_db_error, CoError};
use crate::issue_tracker::{BeadState, IssueTracker};

/// Outcome of reconciling one task's beads against the issue tracker.
#[derive(Debug, Clone, Default)]
pub struct BeadReconciliation {
    pub preserved: u64,
    pub reset: u64,
}

/// Startup reconcile for a single work: every task with status=processing
/// is walked, its beads reconciled against the issue tracker's authoritative
/// state, and the task itself is reset to `pending` so the DAG scheduler
/// picks it up again. Returns the number of tasks reset.
pub async fn reconcile_work(
    pool: &SqlitePool,
    work_id: &str,
    issue_tracker: &dyn IssueTracker,
) -> Result<usize, CoError> {
    let stuck = tasks::reset_processing_tasks_to_pending(pool, work_id)
        .await
        .map_err(classify_db_error)?;

    for task in &stuck {
        let reconciliation = reconcile_task_beads(pool, &task.id, work_id, issue_tracker).await?;

        recovery_events::insert_recovery_event(
            pool,
            RecoveryEventType::TaskReset,
            Some(&task.id),
            Some(work_id),
            None,
            "task was processing at startup, reset to pending",
            serde_json::json!({
                "beads_preserved": reconciliation.preserved,
                "beads_reset": reconciliation.reset,
            }),
        )
        .await
        .map_err(classify_db_error)?;

        tracing::info!(
            task_id = %task.id,
            work_id = work_id,
            beads_preserved = reconciliation.preserved,
            beads_reset = reconciliation.reset,
            "recovered stuck task"
        );
    }

    Ok(stuck.len())
}

/// Reconcile one task's beads against the issue tracker's authoritative
/// state. A closed upstream issue is preserved as `completed`; anything
/// else is reset to `pending`. On a total issue-tracker failure, every
/// bead is reset to `pending` (safer than silently trusting stale local
/// state) and the fallback is logged.
async fn reconcile_task_beads(
    pool: &SqlitePool,
    task_id: &str,
    work_id: &str,
    issue_tracker: &dyn IssueTracker,
) -> Result<BeadReconciliation, CoError> {
    let counts = task_beads::count_task_bead_statuses(pool, task_id)
        .await
        .map_err(classify_db_error)?;
    if counts.total == 0 {
        return Ok(BeadReconciliation::default());
    }

    let bead_ids = bead_ids_for_task(pool, task_id).await?;

    let upstream_states = match issue_tracker.get_beads_with_deps(&bead_ids).await {
        Ok(states) => states,
        Err(err) => {
            tracing::warn!(
                task_id,
                error = %err,
                "issue tracker query failed during recovery, resetting all beads to pending"
            );
            HashMap::new()
        }
    };

    let mut reconciliation = BeadReconciliation::default();

    for bead_id in &bead_ids {
        match upstream_states.get(bead_id) {
            Some(BeadState::Closed) => {
                let rows = task_beads::complete_task_bead(pool, task_id, bead_id)
                    .await
                    .map_err(classify_db_error)?;
                if rows > 0 {
                    reconciliation.preserved += 1;
                    recovery_events::insert_recovery_event(
                        pool,
                        RecoveryEventType::BeadPreserved,
                        Some(task_id),
                        Some(work_id),
                        Some(bead_id),
                        "upstream issue already closed, bead preserved as completed",
                        serde_json::json!({}),
                    )
                    .await
                    .map_err(classify_db_error)?;
                }
            }
            Some(BeadState::Open) | None => {
                let rows = reset_task_bead_to_pending(pool, task_id, bead_id).await?;
                if rows {
                    reconciliation.reset += 1;
                    recovery_events::insert_recovery_event(
                        pool,
                        RecoveryEventType::BeadReset,
                        Some(task_id),
                        Some(work_id),
                        Some(bead_id),
                        "upstream issue still open or unknown, bead reset to pending",
                        serde_json::json!({}),
                    )
                    .await
                    .map_err(classify_db_error)?;
                }
            }
        }
    }

    Ok(reconciliation)
}

async fn bead_ids_for_task(pool: &SqlitePool, task_id: &str) -> Result<Vec<String>, CoError> {
    let row: Vec<(String,)> = sqlx::query_as("SELECT bead_id FROM task_beads WHERE task_id = ?")
        .bind(task_id)
        .fetch_all(pool)
        .await
        .map_err(CoError::from)?;
    Ok(row.into_iter().map(|(id,)| id).collect())
}

/// Reset a `task_beads` row back to pending, regardless of its current
/// status (recovery may need to reset a `completed` row if, for instance,
/// the issue tracker reports it reopened since).
async fn reset_task_bead_to_pending(
    pool: &SqlitePool,
    task_id: &str,
    bead_id: &str,
) -> Result<bool, CoError> {
    let result = sqlx::query(
        "UPDATE task_beads SET status = 'pending' \
         WHERE task_id = ? AND bead_id = ? AND status != 'pending'",
    )
    .bind(task_id)
    .bind(bead_id)
    .execute(pool)
    .await
    .map_err(CoError::from)?;
    Ok(result.rows_affected() > 0)
}

/// Periodic stale-fail reaper: tasks stuck `processing` with no activity
/// in `processing_timeout_minutes` are failed with reason `stale`. Called
/// by the control plane's stale-reaper loop, not by a per-work
/// orchestrator (a dead orchestrator can't run its own reaper).
pub async fn fail_stale_tasks(
    pool: &SqlitePool,
    processing_timeout: Duration,
) -> Result<usize, CoError> {
    let cutoff = Utc::now() - processing_timeout;
    let stale: Vec<(String, String)> = sqlx::query_as(
        "SELECT id, work_id FROM tasks \
         WHERE status = 'processing' \
           AND (last_activity IS NULL OR last_activity < ?)",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .map_err(CoError::from)?;

    let mut failed = 0usize;
    for (task_id, work_id) in stale {
        let rows = tasks::fail_task(pool, &task_id, "stale: no activity within processing_timeout")
            .await
            .map_err(classify_db_error)?;
        if rows == 0 {
            continue;
        }
        failed += 1;

        recovery_events::insert_recovery_event(
            pool,
            RecoveryEventType::TaskStaleFailed,
            Some(&task_id),
            Some(&work_id),
            None,
            "no activity within processing_timeout_minutes",
            serde_json::json!({}),
        )
        .await
        .map_err(classify_db_error)?;

        tracing::warn!(task_id, work_id, "failed stale task");
    }

    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use co_db::queries::{task_beads, tasks, works};
    use co_test_utils::create_test_db;

    use crate::issue_tracker::InMemoryIssueTracker;

    async fn seed_processing_task_with_beads(pool: &SqlitePool) -> (String, String) {
        let work = works::create_work(pool, "work-1", "co/work-1", "main", None)
            .await
            .unwrap();
        let task = tasks::create_task(
            pool,
            "work-1.1",
            &work.id,
            co_db::models::TaskType::Implement,
            &[],
            None,
            0,
        )
        .await
        .unwrap();
        task_beads::add_task_bead(pool, &task.id, "b1").await.unwrap();
        task_beads::add_task_bead(pool, &task.id, "b2").await.unwrap();
        tasks::start_task(pool, &task.id).await.unwrap();
        (work.id, task.id)
    }

    #[tokio::test]
    async fn reconcile_preserves_closed_bead_and_resets_open_one() {
        let pool = create_test_db().await;
        let (work_id, task_id) = seed_processing_task_with_beads(&pool).await;

        let tracker = InMemoryIssueTracker::new();
        tracker.seed("b1", BeadState::Closed);
        tracker.seed("b2", BeadState::Open);

        let reset_count = reconcile_work(&pool, &work_id, &tracker).await.unwrap();
        assert_eq!(reset_count, 1);

        let task = tasks::get_task(&pool, &task_id).await.unwrap().unwrap();
        assert_eq!(task.status, co_db::models::TaskStatus::Pending);

        let counts = task_beads::count_task_bead_statuses(&pool, &task_id).await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.pending, 1);

        let events = recovery_events::list_recovery_events_for_work(&pool, &work_id)
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .any(|e| e.event_type == RecoveryEventType::TaskReset));
        assert!(events
            .iter()
            .any(|e| e.event_type == RecoveryEventType::BeadPreserved));
        assert!(events
            .iter()
            .any(|e| e.event_type == RecoveryEventType::BeadReset));
    }

    #[tokio::test]
    async fn issue_tracker_failure_resets_everything_to_pending() {
        let pool = create_test_db().await;
        let (work_id, task_id) = seed_processing_task_with_beads(&pool).await;

        let tracker = InMemoryIssueTracker::new();
        tracker.seed("b1", BeadState::Closed);
        tracker.fail_next_query();

        reconcile_work(&pool, &work_id, &tracker).await.unwrap();

        let counts = task_beads::count_task_bead_statuses(&pool, &task_id).await.unwrap();
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn fail_stale_tasks_fails_tasks_past_the_timeout() {
        let pool = create_test_db().await;
        let (_work_id, task_id) = seed_processing_task_with_beads(&pool).await;

        sqlx::query("UPDATE tasks SET last_activity = datetime('now', '-10 hours') WHERE id = ?")
            .bind(&task_id)
            .execute(&pool)
            .await
            .unwrap();

        let failed = fail_stale_tasks(&pool, Duration::minutes(120)).await.unwrap();
        assert_eq!(failed, 1);

        let task = tasks::get_task(&pool, &task_id).await.unwrap().unwrap();
        assert_eq!(task.status, co_db::models::TaskStatus::Failed);
    }
}
