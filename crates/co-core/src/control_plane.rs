//! Control plane (C5): the one long-running singleton process per project.
//!
//! Races five concurrent loops sharing one `CancellationToken`: the
//! heartbeat, the scheduled-job drain, the PR-feedback/comment-resolution
//! pollers, and the stale-process/stale-task reaper.

use std::time::Duration as StdDuration;

use chrono::Duration as ChronoDuration;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use co_db::models::{ProcessType, ScheduledJobType, WorkStatus};
use co_db::queries::{scheduler as scheduler_db, works};

use crate::error::CoError;
use crate::notifier::ChangeNotifier;
use crate::process_registry::{self, HEARTBEAT_INTERVAL_SECS};
use crate::recovery;
use crate::scheduler::{self, SchedulerHandlers};

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub scheduler_poll: StdDuration,
    pub pr_feedback_interval: StdDuration,
    pub comment_resolution_interval: StdDuration,
    pub stale_check_interval: StdDuration,
    pub processing_timeout: ChronoDuration,
}

impl ControlPlaneConfig {
    pub fn from_config(config: &crate::config::ConfigFile) -> Self {
        let s = &config.scheduler;
        Self {
            scheduler_poll: StdDuration::from_secs(s.scheduler_poll_seconds),
            pr_feedback_interval: StdDuration::from_secs(s.pr_feedback_interval_minutes * 60),
            comment_resolution_interval: StdDuration::from_secs(
                s.comment_resolution_interval_minutes * 60,
            ),
            stale_check_interval: StdDuration::from_secs(s.stale_check_interval_minutes * 60),
            processing_timeout: ChronoDuration::minutes(s.processing_timeout_minutes as i64),
        }
    }
}

/// Run the control plane to completion (i.e. until `cancel` fires).
///
/// Registers a `processes` row of type `control_plane` -- the table's
/// partial unique index rejects a second registration while this one's
/// heartbeat is fresh, so a caller that gets `CoError::Conflict` here
/// should treat it as "another control plane is already running" and exit,
/// not retry.
pub async fn run(
    pool: SqlitePool,
    handlers: SchedulerHandlers,
    notifier: ChangeNotifier,
    config: ControlPlaneConfig,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let process_id = Uuid::new_v4().to_string();
    process_registry::register(
        &pool,
        &process_id,
        ProcessType::ControlPlane,
        None,
        std::process::id() as i64,
        &process_registry::local_hostname(),
    )
    .await?;

    tracing::info!(process_id, "control plane registered");

    let result = tokio::select! {
        r = heartbeat_loop(&pool, &process_id, cancel.clone()) => r,
        r = scheduler_drain_loop(&pool, &handlers, &notifier, &config, cancel.clone()) => r,
        r = pr_feedback_poll_loop(&pool, &config, cancel.clone()) => r,
        r = comment_resolution_poll_loop(&pool, &config, cancel.clone()) => r,
        r = stale_reaper_loop(&pool, &config, cancel.clone()) => r,
        _ = cancel.cancelled() => Ok(()),
    };

    tracing::info!(process_id, "control plane shutting down, draining");
    let drain_deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    tokio::time::sleep_until(drain_deadline).await;

    if let Err(err) = process_registry::deregister(&pool, &process_id).await {
        tracing::warn!(process_id, error = %err, "failed to deregister control plane");
    }

    result
}

async fn heartbeat_loop(
    pool: &SqlitePool,
    process_id: &str,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let mut ticker = tokio::time::interval(StdDuration::from_secs(HEARTBEAT_INTERVAL_SECS as u64));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !process_registry::heartbeat(pool, process_id).await? {
                    return Err(CoError::Fatal(anyhow::anyhow!(
                        "control plane process row {process_id} disappeared"
                    )));
                }
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

/// Claim and dispatch due scheduled jobs until the queue is empty, then
/// wait for either a notifier tick or the poll interval.
async fn scheduler_drain_loop(
    pool: &SqlitePool,
    handlers: &SchedulerHandlers,
    notifier: &ChangeNotifier,
    config: &ControlPlaneConfig,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let mut change_rx = notifier.subscribe();

    loop {
        loop {
            let Some(job) = scheduler_db::get_next_scheduled_task(pool)
                .await
                .map_err(crate::error::classify_db_error)?
            else {
                break;
            };

            let job_id = job.id.clone();
            match scheduler::dispatch_job(pool, &job, handlers).await {
                Ok(()) => {
                    scheduler_db::mark_task_completed(pool, &job_id)
                        .await
                        .map_err(crate::error::classify_db_error)?;
                }
                Err(err) => {
                    tracing::warn!(job_id, task_type = %job.task_type, error = %err, "scheduled job failed");
                    scheduler_db::reschedule_with_backoff(pool, &job_id, &err.to_string())
                        .await
                        .map_err(crate::error::classify_db_error)?;
                }
            }

            if cancel.is_cancelled() {
                return Ok(());
            }
        }

        tokio::select! {
            _ = change_rx.recv() => {}
            _ = tokio::time::sleep(config.scheduler_poll) => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

/// Every `pr_feedback_interval_minutes`, enqueue a `pr_feedback` poll job
/// for every work with an open PR (debounced via `schedule_or_update_task`
/// so repeated ticks coalesce into one pending row).
async fn pr_feedback_poll_loop(
    pool: &SqlitePool,
    config: &ControlPlaneConfig,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let mut ticker = tokio::time::interval(config.pr_feedback_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                enqueue_for_works_with_open_prs(pool, ScheduledJobType::PrFeedback).await?;
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn comment_resolution_poll_loop(
    pool: &SqlitePool,
    config: &ControlPlaneConfig,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let mut ticker = tokio::time::interval(config.comment_resolution_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                enqueue_for_works_with_open_prs(pool, ScheduledJobType::CommentResolution).await?;
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn enqueue_for_works_with_open_prs(
    pool: &SqlitePool,
    task_type: ScheduledJobType,
) -> Result<(), CoError> {
    let works = works::list_works(pool, Some(WorkStatus::Processing))
        .await
        .map_err(crate::error::classify_db_error)?;

    for work in works.into_iter().filter(|w| w.pr_url.is_some()) {
        scheduler_db::schedule_or_update_task(
            pool,
            &Uuid::new_v4().to_string(),
            &work.id,
            task_type,
            chrono::Utc::now(),
        )
        .await
        .map_err(crate::error::classify_db_error)?;
    }
    Ok(())
}

/// Every `stale_check_interval_minutes`: evict processes whose heartbeat
/// has gone stale and fail tasks that have sat `processing` with no
/// activity for longer than `processing_timeout_minutes`.
async fn stale_reaper_loop(
    pool: &SqlitePool,
    config: &ControlPlaneConfig,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let mut ticker = tokio::time::interval(config.stale_check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stale_processes = process_registry::list_stale(pool).await?;
                for process in &stale_processes {
                    tracing::warn!(process_id = %process.id, process_type = %process.process_type, "reaping stale process");
                    process_registry::deregister(pool, &process.id).await?;
                }

                let failed = recovery::fail_stale_tasks(pool, config.processing_timeout).await?;
                if failed > 0 {
                    tracing::info!(failed, "stale reaper failed abandoned tasks");
                }
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use co_test_utils::create_test_db;
    use std::sync::Arc as StdArc;

    use crate::forge::InMemoryForge;
    use crate::issue_tracker::InMemoryIssueTracker;
    use crate::scheduler::OrchestratorSpawner;
    use crate::worktree::WorktreeManager;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoopSpawner;
    #[async_trait]
    impl OrchestratorSpawner for NoopSpawner {
        async fn spawn(&self, _work_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_handlers() -> (TempDir, StdArc<InMemoryForge>, SchedulerHandlers) {
        let dir = TempDir::new().unwrap();
        std::process::Command::new("git")
            .args(["init"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let worktree = WorktreeManager::new(dir.path(), None).unwrap();
        let forge = StdArc::new(InMemoryForge::new());
        (
            dir,
            forge.clone(),
            SchedulerHandlers {
                forge,
                worktree,
                spawner: StdArc::new(NoopSpawner),
                issue_tracker: StdArc::new(InMemoryIssueTracker::new()),
            },
        )
    }

    #[tokio::test]
    async fn registers_and_deregisters_on_cancellation() {
        let pool = create_test_db().await;
        let (_dir, _forge, handlers) = test_handlers();
        let notifier = ChangeNotifier::disabled();
        let config = ControlPlaneConfig {
            scheduler_poll: StdDuration::from_millis(20),
            pr_feedback_interval: StdDuration::from_secs(3600),
            comment_resolution_interval: StdDuration::from_secs(3600),
            stale_check_interval: StdDuration::from_secs(3600),
            processing_timeout: ChronoDuration::minutes(120),
        };
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        let pool_clone = pool.clone();
        let run_handle = tokio::spawn(async move {
            run(pool_clone, handlers, notifier, config, cancel_clone).await
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(process_registry::get_control_plane(&pool).await.unwrap().is_some());

        cancel.cancel();
        let result = tokio::time::timeout(StdDuration::from_secs(10), run_handle)
            .await
            .expect("control plane did not shut down in time")
            .unwrap();
        assert!(result.is_ok());

        assert!(process_registry::get_control_plane(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drains_a_pending_git_push_job() {
        let pool = create_test_db().await;
        works::create_work(&pool, "work-1", "co/work-1", "main", None)
            .await
            .unwrap();
        works::set_worktree_path(&pool, "work-1", "/tmp/does-not-matter")
            .await
            .unwrap();

        let (_dir, forge, handlers) = test_handlers();
        let notifier = ChangeNotifier::disabled();

        scheduler_db::schedule_task_with_retry(
            &pool,
            &Uuid::new_v4().to_string(),
            Some("work-1"),
            ScheduledJobType::GitPush,
            chrono::Utc::now() - chrono::Duration::seconds(1),
            None,
            serde_json::json!({}),
            scheduler_db::DEFAULT_MAX_ATTEMPTS,
        )
        .await
        .unwrap();

        let config = ControlPlaneConfig {
            scheduler_poll: StdDuration::from_millis(20),
            pr_feedback_interval: StdDuration::from_secs(3600),
            comment_resolution_interval: StdDuration::from_secs(3600),
            stale_check_interval: StdDuration::from_secs(3600),
            processing_timeout: ChronoDuration::minutes(120),
        };
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let drain = scheduler_drain_loop(&pool, &handlers, &notifier, &config, cancel_clone);
        let watchdog = async {
            tokio::time::sleep(StdDuration::from_millis(150)).await;
            cancel.cancel();
        };
        tokio::time::timeout(StdDuration::from_secs(5), async {
            tokio::select! {
                _ = drain => {}
                _ = watchdog => {}
            }
        })
        .await
        .unwrap();

        assert_eq!(forge.pushed_branches.lock().unwrap().len(), 1);
    }
}
