//! Scheduled-job handler dispatch (C4): given a claimed `scheduled_jobs`
//! row, run the side effect its `task_type` names and report success or a
//! retryable failure back to the caller (the control plane's drain loop,
//! which then calls `mark_task_completed` or `reschedule_with_backoff`).
//!
//! One function per job type, each running a single collaborator side
//! effect rather than a state transition.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use co_db::models::{ScheduledJob, ScheduledJobType};
use co_db::queries::pr_feedback::FollowUpJob;
use co_db::queries::{pr_feedback, scheduler as scheduler_db, works};

use crate::error::{classify_db_error, CoError};
use crate::forge::Forge;
use crate::issue_tracker::{BeadState, IssueTracker};
use crate::process_registry;
use crate::worktree::WorktreeManager;

/// Spawns the per-work orchestrator process. Abstracted behind a trait so
/// tests can observe a spawn without actually forking a process.
#[async_trait]
pub trait OrchestratorSpawner: Send + Sync {
    async fn spawn(&self, work_id: &str) -> anyhow::Result<()>;
}

/// Spawns `co orchestrator <work_id>` as a detached child of the current
/// executable. Used in production; tests use an in-memory double.
pub struct ProcessOrchestratorSpawner;

#[async_trait]
impl OrchestratorSpawner for ProcessOrchestratorSpawner {
    async fn spawn(&self, work_id: &str) -> anyhow::Result<()> {
        let exe = std::env::current_exe()?;
        tokio::process::Command::new(exe)
            .args(["orchestrator", work_id])
            .kill_on_drop(false)
            .spawn()?;
        Ok(())
    }
}

/// The collaborators a job handler may need. Bundled so `dispatch_job`
/// takes one argument instead of four.
pub struct SchedulerHandlers {
    pub forge: Arc<dyn Forge>,
    pub worktree: WorktreeManager,
    pub spawner: Arc<dyn OrchestratorSpawner>,
    pub issue_tracker: Arc<dyn IssueTracker>,
}

/// Run the side effect named by `job.task_type`. Returns `Ok(())` on
/// success; any `Err` is treated by the caller as retryable and fed to
/// `reschedule_with_backoff`.
pub async fn dispatch_job(
    pool: &SqlitePool,
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    match job.task_type {
        ScheduledJobType::GitPush => handle_git_push(pool, job, handlers).await,
        ScheduledJobType::GithubComment => handle_github_comment(job, handlers).await,
        ScheduledJobType::GithubResolveThread => handle_github_resolve_thread(job, handlers).await,
        ScheduledJobType::CreateWorktree => handle_create_worktree(pool, job, handlers).await,
        ScheduledJobType::DestroyWorktree => handle_destroy_worktree(pool, job, handlers).await,
        ScheduledJobType::SpawnOrchestrator => handle_spawn_orchestrator(pool, job, handlers).await,
        ScheduledJobType::PrFeedback => handle_pr_feedback(pool, job, handlers).await,
        ScheduledJobType::CommentResolution => handle_comment_resolution(pool, job, handlers).await,
    }
}

fn require_work_id(job: &ScheduledJob) -> Result<&str, CoError> {
    job.work_id
        .as_deref()
        .ok_or_else(|| CoError::ExternalFailure(format!("job {} has no work_id", job.id)))
}

async fn load_work(pool: &SqlitePool, work_id: &str) -> Result<co_db::models::Work, CoError> {
    works::get_work(pool, work_id)
        .await
        .map_err(classify_db_error)?
        .ok_or_else(|| CoError::NotFound(format!("work {work_id} not found")))
}

fn metadata_str<'a>(job: &'a ScheduledJob, key: &str) -> Option<&'a str> {
    job.metadata.get(key).and_then(|v| v.as_str())
}

async fn handle_git_push(
    pool: &SqlitePool,
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    let work_id = require_work_id(job)?;
    let work = load_work(pool, work_id).await?;
    let worktree_path = work
        .worktree_path
        .as_deref()
        .ok_or_else(|| CoError::ExternalFailure(format!("work {work_id} has no worktree yet")))?;

    handlers
        .forge
        .push_branch(worktree_path, &work.branch_name)
        .await
        .map_err(CoError::Transient)
}

async fn handle_github_comment(job: &ScheduledJob, handlers: &SchedulerHandlers) -> Result<(), CoError> {
    let pr_url = metadata_str(job, "pr_url")
        .ok_or_else(|| CoError::ExternalFailure(format!("job {} missing pr_url", job.id)))?;
    let body = metadata_str(job, "body")
        .ok_or_else(|| CoError::ExternalFailure(format!("job {} missing body", job.id)))?;

    handlers
        .forge
        .add_comment(pr_url, body)
        .await
        .map_err(CoError::Transient)
}

async fn handle_github_resolve_thread(
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    let pr_url = metadata_str(job, "pr_url")
        .ok_or_else(|| CoError::ExternalFailure(format!("job {} missing pr_url", job.id)))?;
    let thread_id = metadata_str(job, "thread_id")
        .ok_or_else(|| CoError::ExternalFailure(format!("job {} missing thread_id", job.id)))?;

    handlers
        .forge
        .resolve_thread(pr_url, thread_id)
        .await
        .map_err(CoError::Transient)
}

async fn handle_create_worktree(
    pool: &SqlitePool,
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    let work_id = require_work_id(job)?;
    let work = load_work(pool, work_id).await?;

    let info = handlers
        .worktree
        .create_worktree(&work.branch_name)
        .map_err(|e| CoError::Transient(e.into()))?;

    let path = info
        .path
        .to_str()
        .ok_or_else(|| CoError::Fatal(anyhow::anyhow!("worktree path is not valid UTF-8")))?;

    works::set_worktree_path(pool, work_id, path)
        .await
        .map_err(classify_db_error)
}

async fn handle_destroy_worktree(
    pool: &SqlitePool,
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    let work_id = require_work_id(job)?;
    let work = load_work(pool, work_id).await?;

    if let Some(path) = &work.worktree_path {
        handlers
            .worktree
            .remove_worktree(std::path::Path::new(path))
            .map_err(|e| CoError::Transient(e.into()))?;
    }
    handlers
        .worktree
        .delete_branch(&work.branch_name)
        .map_err(|e| CoError::Transient(e.into()))
}

async fn handle_spawn_orchestrator(
    pool: &SqlitePool,
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    let work_id = require_work_id(job)?;

    if process_registry::has_live_orchestrator(pool, work_id).await? {
        tracing::debug!(work_id, "orchestrator already live, skipping spawn");
        return Ok(());
    }

    handlers
        .spawner
        .spawn(work_id)
        .await
        .map_err(CoError::Transient)
}

async fn handle_pr_feedback(
    pool: &SqlitePool,
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    let work_id = require_work_id(job)?;
    let work = load_work(pool, work_id).await?;
    let pr_url = work
        .pr_url
        .as_deref()
        .ok_or_else(|| CoError::ExternalFailure(format!("work {work_id} has no open PR yet")))?;

    let items = handlers
        .forge
        .poll_feedback(pr_url)
        .await
        .map_err(CoError::Transient)?;

    let mut ingested_any = false;
    for item in items {
        pr_feedback::insert_feedback(
            pool,
            &Uuid::new_v4().to_string(),
            work_id,
            pr_url,
            &item.feedback_type,
            &item.title,
            &item.description,
            "forge",
            item.source_url.as_deref(),
            &item.source_id,
            0,
        )
        .await
        .map_err(classify_db_error)?;
        ingested_any = true;
    }

    // New feedback needs the work orchestrator awake to turn it into
    // follow-up tasks; nudge it rather than deciding task shape here.
    if ingested_any {
        scheduler_db::schedule_or_update_task(
            pool,
            &Uuid::new_v4().to_string(),
            work_id,
            ScheduledJobType::SpawnOrchestrator,
            chrono::Utc::now(),
        )
        .await
        .map_err(classify_db_error)?;
    }

    Ok(())
}

/// Reconcile unresolved feedback against its triage bead: once the bead
/// closes upstream, resolve the forge thread, mark the row resolved and
/// enqueue the follow-up tasks that resolution implies. Feedback with no
/// triage bead, or whose bead is still open, is left unresolved for the
/// next poll.
async fn handle_comment_resolution(
    pool: &SqlitePool,
    job: &ScheduledJob,
    handlers: &SchedulerHandlers,
) -> Result<(), CoError> {
    let work_id = require_work_id(job)?;
    let work = load_work(pool, work_id).await?;
    let Some(pr_url) = work.pr_url.as_deref() else {
        return Ok(());
    };

    let unresolved = pr_feedback::list_unresolved_feedback(pool, work_id)
        .await
        .map_err(classify_db_error)?;

    let bead_ids: Vec<String> = unresolved.iter().filter_map(|f| f.bead_id.clone()).collect();
    if bead_ids.is_empty() {
        return Ok(());
    }

    let bead_states = handlers
        .issue_tracker
        .get_beads_with_deps(&bead_ids)
        .await
        .map_err(CoError::Transient)?;

    for item in unresolved {
        let Some(bead_id) = &item.bead_id else {
            continue;
        };
        if !matches!(bead_states.get(bead_id), Some(BeadState::Closed)) {
            continue;
        }

        if item.source == "forge" {
            handlers
                .forge
                .resolve_thread(pr_url, &item.source_id)
                .await
                .map_err(CoError::Transient)?;
        }

        let follow_up_id = Uuid::new_v4().to_string();
        let idempotency_key = format!("pr-feedback-followup:{}", item.id);
        pr_feedback::mark_feedback_resolved_and_schedule_tasks(
            pool,
            &item.id,
            work_id,
            &[FollowUpJob {
                id: &follow_up_id,
                task_type: ScheduledJobType::SpawnOrchestrator,
                idempotency_key: Some(&idempotency_key),
            }],
        )
        .await
        .map_err(classify_db_error)?;
    }

    Ok(())
}
