//! `co work create`: register a new unit of work and queue the jobs that
//! bring it to life (a worktree, then the orchestrator process that will
//! drive it).

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use co_db::models::{ScheduledJobType, TaskType};
use co_db::queries::scheduler as scheduler_db;
use co_db::queries::tasks as task_db;
use co_db::queries::work_beads as work_bead_db;
use co_db::queries::works as work_db;

/// Create a work for `branch_name` against `base_branch`, seed it with a
/// single `implement` task, and enqueue the worktree-creation and
/// orchestrator-spawn jobs that pick it up.
///
/// Worktree creation and the orchestrator spawn are both queued through the
/// same durable `scheduled_jobs` table the control plane drains, rather
/// than done inline here -- a `work create` that crashes mid-call still
/// leaves a durable job to finish the job once a control plane is running.
pub async fn run_create(
    pool: &SqlitePool,
    branch_name: &str,
    base_branch: &str,
    root_issue_id: Option<&str>,
    bead_ids: &[String],
) -> Result<String> {
    let work_id = Uuid::new_v4().to_string();
    let work = work_db::create_work(pool, &work_id, branch_name, base_branch, root_issue_id).await?;

    if !bead_ids.is_empty() {
        let group_id = work_bead_db::get_next_bead_group_id(pool).await?;
        work_bead_db::add_work_beads(pool, &work.id, bead_ids, group_id).await?;
    }

    task_db::create_task(
        pool,
        &Uuid::new_v4().to_string(),
        &work.id,
        TaskType::Implement,
        bead_ids,
        None,
        0,
    )
    .await?;

    scheduler_db::schedule_task_with_retry(
        pool,
        &Uuid::new_v4().to_string(),
        Some(&work.id),
        ScheduledJobType::CreateWorktree,
        Utc::now(),
        Some(&format!("create-worktree:{}", work.id)),
        serde_json::json!({}),
        scheduler_db::DEFAULT_MAX_ATTEMPTS,
    )
    .await?;

    scheduler_db::schedule_task_with_retry(
        pool,
        &Uuid::new_v4().to_string(),
        Some(&work.id),
        ScheduledJobType::SpawnOrchestrator,
        Utc::now() + chrono::Duration::seconds(scheduler_db::OPTIMISTIC_EXECUTION_DELAY_SECS),
        Some(&format!("spawn-orchestrator:{}", work.id)),
        serde_json::json!({}),
        scheduler_db::DEFAULT_MAX_ATTEMPTS,
    )
    .await?;

    Ok(work.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use co_db::models::ScheduledJobStatus;
    use co_test_utils::create_test_db;

    #[tokio::test]
    async fn creates_work_with_seed_task_and_jobs() {
        let pool = create_test_db().await;
        let work_id = run_create(&pool, "co/add-auth", "main", None, &[]).await.unwrap();

        let work = work_db::get_work(&pool, &work_id).await.unwrap().unwrap();
        assert_eq!(work.branch_name, "co/add-auth");
        assert_eq!(work.base_branch, "main");

        let tasks = task_db::list_tasks_for_work(&pool, &work_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TaskType::Implement);

        // Re-scheduling the same idempotency key should hand back the
        // existing row rather than duplicating the job.
        let job = scheduler_db::schedule_task_with_retry(
            &pool,
            &Uuid::new_v4().to_string(),
            Some(&work_id),
            ScheduledJobType::CreateWorktree,
            Utc::now(),
            Some(&format!("create-worktree:{work_id}")),
            serde_json::json!({}),
            scheduler_db::DEFAULT_MAX_ATTEMPTS,
        )
        .await
        .unwrap();
        assert_eq!(job.status, ScheduledJobStatus::Pending);
        assert_eq!(job.work_id.as_deref(), Some(work_id.as_str()));
    }

    #[tokio::test]
    async fn attaches_selected_beads_to_work_and_seed_task() {
        let pool = create_test_db().await;
        let bead_ids = vec!["bead-1".to_string(), "bead-2".to_string()];
        let work_id = run_create(&pool, "co/add-auth", "main", None, &bead_ids)
            .await
            .unwrap();

        let tasks = task_db::list_tasks_for_work(&pool, &work_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        let counts = co_db::queries::task_beads::count_task_bead_statuses(&pool, &tasks[0].id)
            .await
            .unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.pending, 2);
    }
}
