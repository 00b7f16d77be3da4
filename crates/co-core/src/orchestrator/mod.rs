//! Work orchestrator (C6): one process per in-flight work, driving its
//! task DAG to completion.
//!
//! The main loop is register -> recovery -> loop -> heartbeat-in-parallel
//! -> deregister, processing one ready task at a time: reactive ("for the
//! next ready task... after the supervisor returns, re-evaluate"), not a
//! batch of concurrently-running agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use co_db::models::{ProcessType, ScheduledJobType, Task, TaskType, Work, WorkStatus};
use co_db::queries::scheduler as scheduler_db;
use co_db::queries::tasks;
use co_db::queries::works;

use crate::config::ConfigFile;
use crate::error::{classify_db_error, CoError};
use crate::forge::Forge;
use crate::harness::{HarnessRegistry, MaterializedTask};
use crate::issue_tracker::IssueTracker;
use crate::notifier::ChangeNotifier;
use crate::process_registry::{self, HEARTBEAT_INTERVAL_SECS};
use crate::recovery;
use crate::supervisor::{self, SupervisorConfig, SupervisorOutcome};

/// Name of the harness every task is dispatched to. There is exactly one
/// harness wired up today, so the orchestrator just asks for it by name
/// instead of carrying a per-task harness selection column.
const DEFAULT_HARNESS: &str = "claude-code";

/// How the orchestrator's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorResult {
    /// The work reached a terminal status (completed, failed, or merged).
    Finished,
    /// `cancel` fired before the work reached a terminal status.
    Cancelled,
}

/// Collaborators the orchestrator needs beyond the database.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub registry: Arc<HarnessRegistry>,
    pub forge: Arc<dyn Forge>,
    pub issue_tracker: Arc<dyn IssueTracker>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub supervisor: SupervisorConfig,
    pub max_review_iterations: u32,
    pub pr_feedback_interval: StdDuration,
    pub main_loop_poll: StdDuration,
}

impl OrchestratorConfig {
    pub fn from_config(config: &ConfigFile) -> Self {
        let timeout_minutes = config.claude.task_timeout_minutes;
        let task_timeout = if timeout_minutes == 0 {
            StdDuration::from_secs(u64::MAX / 2)
        } else {
            StdDuration::from_secs(timeout_minutes * 60)
        };
        Self {
            supervisor: SupervisorConfig {
                task_timeout,
                activity_update_interval: StdDuration::from_secs(30),
            },
            max_review_iterations: config.workflow.max_review_iterations,
            pr_feedback_interval: StdDuration::from_secs(
                config.scheduler.pr_feedback_interval_minutes * 60,
            ),
            main_loop_poll: StdDuration::from_secs(2),
        }
    }
}

/// Run the orchestrator for `work_id` to completion (i.e. until the work
/// reaches a terminal status) or until `cancel` fires.
pub async fn run_orchestrator(
    pool: SqlitePool,
    work_id: String,
    deps: OrchestratorDeps,
    notifier: ChangeNotifier,
    config: OrchestratorConfig,
    cancel: CancellationToken,
) -> Result<OrchestratorResult, CoError> {
    let process_id = Uuid::new_v4().to_string();
    process_registry::register(
        &pool,
        &process_id,
        ProcessType::Orchestrator,
        Some(&work_id),
        std::process::id() as i64,
        &process_registry::local_hostname(),
    )
    .await?;

    recovery::reconcile_work(&pool, &work_id, deps.issue_tracker.as_ref()).await?;

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => OrchestratorResult::Cancelled,
        res = main_loop(&pool, &work_id, &deps, &notifier, &config, cancel.clone()) => res?,
        res = heartbeat_loop(&pool, &process_id, cancel.clone()) => {
            res?;
            OrchestratorResult::Cancelled
        }
    };

    process_registry::deregister(&pool, &process_id).await?;
    Ok(result)
}

async fn heartbeat_loop(
    pool: &SqlitePool,
    process_id: &str,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let mut ticker = tokio::time::interval(StdDuration::from_secs(HEARTBEAT_INTERVAL_SECS as u64));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !process_registry::heartbeat(pool, process_id).await? {
                    return Err(CoError::Fatal(anyhow::anyhow!(
                        "orchestrator process row {process_id} disappeared"
                    )));
                }
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn main_loop(
    pool: &SqlitePool,
    work_id: &str,
    deps: &OrchestratorDeps,
    notifier: &ChangeNotifier,
    config: &OrchestratorConfig,
    cancel: CancellationToken,
) -> Result<OrchestratorResult, CoError> {
    loop {
        if cancel.is_cancelled() {
            return Ok(OrchestratorResult::Cancelled);
        }

        let work = works::get_work(pool, work_id)
            .await
            .map_err(classify_db_error)?
            .ok_or_else(|| CoError::NotFound(format!("work {work_id} not found")))?;

        if matches!(
            work.status,
            WorkStatus::Completed | WorkStatus::Failed | WorkStatus::Merged
        ) {
            return Ok(OrchestratorResult::Finished);
        }

        let ready = tasks::ready_tasks_for_work(pool, work_id)
            .await
            .map_err(classify_db_error)?;

        if ready.is_empty() {
            let progress = tasks::get_work_progress(pool, work_id)
                .await
                .map_err(classify_db_error)?;

            if progress.processing > 0 {
                wait_for_change_or_cancel(notifier, &cancel, config.main_loop_poll).await;
                continue;
            }

            if progress.total > 0 && progress.completed == progress.total {
                works::transition_work_status(pool, work_id, work.status, WorkStatus::Completed)
                    .await
                    .map_err(classify_db_error)?;
                tracing::info!(work_id, "work completed");
                return Ok(OrchestratorResult::Finished);
            }

            if progress.failed > 0 {
                works::transition_work_status(pool, work_id, work.status, WorkStatus::Failed)
                    .await
                    .map_err(classify_db_error)?;
                tracing::warn!(work_id, "work failed: no path to completion");
                return Ok(OrchestratorResult::Finished);
            }

            // No ready, processing, completed-all, or failed tasks: every
            // remaining task is blocked on a dependency that hasn't been
            // created yet. Wait for a change and re-evaluate.
            wait_for_change_or_cancel(notifier, &cancel, config.main_loop_poll).await;
            continue;
        }

        if work.status == WorkStatus::Pending {
            works::transition_work_status(pool, work_id, WorkStatus::Pending, WorkStatus::Processing)
                .await
                .map_err(classify_db_error)?;
        }

        let task = &ready[0];
        run_task(pool, work_id, &work, task, deps, notifier, config, cancel.clone()).await?;
    }
}

async fn wait_for_change_or_cancel(
    notifier: &ChangeNotifier,
    cancel: &CancellationToken,
    fallback: StdDuration,
) {
    let mut rx = notifier.subscribe();
    tokio::select! {
        _ = rx.recv() => {}
        _ = tokio::time::sleep(fallback) => {}
        _ = cancel.cancelled() => {}
    }
}

async fn run_task(
    pool: &SqlitePool,
    work_id: &str,
    work: &Work,
    task: &Task,
    deps: &OrchestratorDeps,
    notifier: &ChangeNotifier,
    config: &OrchestratorConfig,
    cancel: CancellationToken,
) -> Result<(), CoError> {
    let started = tasks::start_task(pool, &task.id).await.map_err(classify_db_error)?;
    if started == 0 {
        // Another orchestrator (or a racing recovery pass) already claimed
        // this task; let the next loop iteration re-read ready tasks.
        return Ok(());
    }

    let harness = deps.registry.get(DEFAULT_HARNESS).ok_or_else(|| {
        CoError::Fatal(anyhow::anyhow!("no harness registered as '{DEFAULT_HARNESS}'"))
    })?;

    let materialized = materialize_task(work, task);

    let outcome = supervisor::supervise(
        pool,
        &materialized,
        &harness,
        notifier,
        cancel,
        &config.supervisor,
    )
    .await?;

    supervisor::apply_outcome(pool, &task.id, &outcome).await?;

    if outcome != SupervisorOutcome::Completed {
        return Ok(());
    }

    if task.task_type == TaskType::Pr {
        finalize_pr_task(pool, work_id, work, task, deps, config).await?;
    }

    if tasks::is_auto_workflow(pool, &task.id).await.map_err(classify_db_error)? {
        enqueue_followups(pool, work_id, task, config).await?;
    }

    Ok(())
}

fn materialize_task(work: &Work, task: &Task) -> MaterializedTask {
    let working_dir = task
        .worktree_path
        .clone()
        .or_else(|| work.worktree_path.clone())
        .unwrap_or_else(|| ".".to_string());

    MaterializedTask {
        task_id: task.id.clone(),
        name: describe_task(task),
        description: format!(
            "{} task for work {} (branch {}).",
            task.task_type, work.id, work.branch_name
        ),
        invariant_commands: vec![],
        working_dir: working_dir.into(),
        env_vars: HashMap::new(),
    }
}

fn describe_task(task: &Task) -> String {
    format!("{}-{}", task.task_type, &task.id[..8.min(task.id.len())])
}

/// Push the work's branch and open a PR once a `pr`-type task completes,
/// then persist the resulting URL on both the task and the work and
/// schedule the recurring PR-feedback poll.
async fn finalize_pr_task(
    pool: &SqlitePool,
    work_id: &str,
    work: &Work,
    task: &Task,
    deps: &OrchestratorDeps,
    config: &OrchestratorConfig,
) -> Result<(), CoError> {
    let worktree_path = work
        .worktree_path
        .as_deref()
        .ok_or_else(|| CoError::Fatal(anyhow::anyhow!("work {work_id} has no worktree path")))?;

    deps.forge
        .push_branch(worktree_path, &work.branch_name)
        .await
        .map_err(CoError::Transient)?;

    let title = format!("co: {}", work.branch_name);
    let body = format!("Automated pull request for work {work_id}.");
    let pr_url = deps
        .forge
        .create_pr(&work.branch_name, &work.base_branch, &title, &body)
        .await
        .map_err(CoError::Transient)?;

    tasks::set_task_pr_url(pool, &task.id, &pr_url)
        .await
        .map_err(classify_db_error)?;
    works::set_pr_url(pool, work_id, &pr_url)
        .await
        .map_err(classify_db_error)?;

    let scheduled_at = Utc::now()
        + chrono::Duration::from_std(config.pr_feedback_interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
    scheduler_db::schedule_or_update_task(
        pool,
        &Uuid::new_v4().to_string(),
        work_id,
        ScheduledJobType::PrFeedback,
        scheduled_at,
    )
    .await
    .map_err(classify_db_error)?;

    Ok(())
}

/// Data-driven workflow policy: a completed task's `task_type` selects
/// which follow-up task (if any) gets created next.
async fn enqueue_followups(
    pool: &SqlitePool,
    work_id: &str,
    task: &Task,
    config: &OrchestratorConfig,
) -> Result<(), CoError> {
    match task.task_type {
        TaskType::Implement => {
            create_followup_task(pool, work_id, TaskType::Review).await?;
        }
        TaskType::Review => {
            let iterations = count_completed_of_type(pool, work_id, TaskType::Review).await?;
            if iterations < config.max_review_iterations as i64 {
                create_followup_task(pool, work_id, TaskType::Review).await?;
            } else {
                create_followup_task(pool, work_id, TaskType::Pr).await?;
            }
        }
        _ => {}
    }
    Ok(())
}

async fn count_completed_of_type(
    pool: &SqlitePool,
    work_id: &str,
    task_type: TaskType,
) -> Result<i64, CoError> {
    let all = tasks::list_tasks_for_work(pool, work_id)
        .await
        .map_err(classify_db_error)?;
    Ok(all
        .iter()
        .filter(|t| t.task_type == task_type && t.status == co_db::models::TaskStatus::Completed)
        .count() as i64)
}

async fn create_followup_task(
    pool: &SqlitePool,
    work_id: &str,
    task_type: TaskType,
) -> Result<Task, CoError> {
    let existing = tasks::list_tasks_for_work(pool, work_id)
        .await
        .map_err(classify_db_error)?;
    let position = existing.len() as i64;

    tasks::create_task(
        pool,
        &Uuid::new_v4().to_string(),
        work_id,
        task_type,
        &[],
        None,
        position,
    )
    .await
    .map_err(classify_db_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::InMemoryForge;
    use crate::harness::{AgentEvent, AgentHandle};
    use crate::issue_tracker::InMemoryIssueTracker;
    use async_trait::async_trait;
    use co_test_utils::create_test_db;
    use futures::Stream;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A harness double that immediately reports completion for every task.
    struct ScriptedHarness {
        spawns: AtomicUsize,
    }

    impl ScriptedHarness {
        fn new() -> Self {
            Self {
                spawns: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl crate::harness::Harness for ScriptedHarness {
        fn name(&self) -> &str {
            "claude-code"
        }

        async fn spawn(&self, task: &MaterializedTask) -> anyhow::Result<AgentHandle> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            Ok(AgentHandle {
                pid: 1,
                stdin: None,
                task_id: task.task_id.clone(),
                attempt: 0,
                harness_name: "claude-code".to_string(),
            })
        }

        fn events(&self, _handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
            Box::pin(futures::stream::once(async { AgentEvent::Completed }))
        }

        async fn send(&self, _handle: &AgentHandle, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn kill(&self, _handle: &AgentHandle) -> anyhow::Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &AgentHandle) -> bool {
            false
        }
    }

    fn test_deps() -> OrchestratorDeps {
        let mut registry = HarnessRegistry::new();
        registry.register(ScriptedHarness::new());
        OrchestratorDeps {
            registry: Arc::new(registry),
            forge: Arc::new(InMemoryForge::new()),
            issue_tracker: Arc::new(InMemoryIssueTracker::new()),
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            supervisor: SupervisorConfig {
                task_timeout: StdDuration::from_secs(5),
                activity_update_interval: StdDuration::from_secs(30),
            },
            max_review_iterations: 1,
            pr_feedback_interval: StdDuration::from_secs(300),
            main_loop_poll: StdDuration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn runs_implement_review_pr_chain_to_completion() {
        let pool = create_test_db().await;
        let work = works::create_work(&pool, "work-1", "co/work-1", "main", None)
            .await
            .unwrap();
        works::set_worktree_path(&pool, &work.id, "/tmp/work-1").await.unwrap();
        tasks::create_task(&pool, "task-implement", &work.id, TaskType::Implement, &[], None, 0)
            .await
            .unwrap();

        let deps = test_deps();
        let notifier = ChangeNotifier::disabled();
        let config = test_config();
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            StdDuration::from_secs(5),
            main_loop(&pool, &work.id, &deps, &notifier, &config, cancel),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result, OrchestratorResult::Finished);

        let final_work = works::get_work(&pool, &work.id).await.unwrap().unwrap();
        assert_eq!(final_work.status, WorkStatus::Completed);
        assert!(final_work.pr_url.is_some());

        let all_tasks = tasks::list_tasks_for_work(&pool, &work.id).await.unwrap();
        let types: Vec<_> = all_tasks.iter().map(|t| t.task_type).collect();
        assert!(types.contains(&TaskType::Implement));
        assert!(types.contains(&TaskType::Review));
        assert!(types.contains(&TaskType::Pr));
        assert!(all_tasks
            .iter()
            .all(|t| t.status == co_db::models::TaskStatus::Completed));
    }

    #[tokio::test]
    async fn manual_task_blocks_completion_without_followups() {
        let pool = create_test_db().await;
        let work = works::create_work(&pool, "work-2", "co/work-2", "main", None)
            .await
            .unwrap();
        works::set_worktree_path(&pool, &work.id, "/tmp/work-2").await.unwrap();
        let task = tasks::create_task(&pool, "task-manual", &work.id, TaskType::Implement, &[], None, 0)
            .await
            .unwrap();
        tasks::set_task_metadata(&pool, &task.id, "auto_workflow", "false")
            .await
            .unwrap();

        let deps = test_deps();
        let notifier = ChangeNotifier::disabled();
        let config = test_config();
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            StdDuration::from_secs(2),
            main_loop(&pool, &work.id, &deps, &notifier, &config, cancel.clone()),
        )
        .await;

        // The single manual task completes but no review/pr follow-up is
        // enqueued, so the work never reaches all-completed and the loop
        // keeps waiting (no ready, none processing, not all completed) --
        // it only stops here because we cancel it for the test.
        assert!(result.is_err(), "loop should still be waiting, not finished");
        cancel.cancel();

        let all_tasks = tasks::list_tasks_for_work(&pool, &work.id).await.unwrap();
        assert_eq!(all_tasks.len(), 1);
        assert_eq!(all_tasks[0].status, co_db::models::TaskStatus::Completed);
    }

    #[tokio::test]
    async fn recovery_runs_before_main_loop_via_run_orchestrator() {
        let pool = create_test_db().await;
        let work = works::create_work(&pool, "work-3", "co/work-3", "main", None)
            .await
            .unwrap();
        works::set_worktree_path(&pool, &work.id, "/tmp/work-3").await.unwrap();
        let stuck = tasks::create_task(&pool, "task-stuck", &work.id, TaskType::Implement, &[], None, 0)
            .await
            .unwrap();
        tasks::start_task(&pool, &stuck.id).await.unwrap();

        let deps = test_deps();
        let notifier = ChangeNotifier::disabled();
        let config = test_config();
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            StdDuration::from_secs(5),
            run_orchestrator(pool.clone(), work.id.clone(), deps, notifier, config, cancel),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result, OrchestratorResult::Finished);
        let final_work = works::get_work(&pool, &work.id).await.unwrap().unwrap();
        assert_eq!(final_work.status, WorkStatus::Completed);
    }
}
