//! Agent supervisor (C7): spawn one agent for one task and race its
//! completion against the sources that can end a run.
//!
//! Races four sources to a terminal outcome: the harness's own event
//! stream reporting the process exited, the change-notifier waking
//! because something else wrote the DB, a 2s poll fallback, and
//! cancellation -- each terminal path going through `Harness::kill`'s
//! SIGTERM-then-SIGKILL-after-5s.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use co_db::queries::tasks;

use crate::error::{classify_db_error, CoError};
use crate::harness::{AgentEvent, Harness, MaterializedTask};
use crate::notifier::{ChangeNotifier, POLL_FALLBACK_INTERVAL};

/// How often the supervisor touches `tasks.last_activity` while an agent is
/// running, so the stale reaper can tell a healthy long task from an
/// abandoned one.
pub const ACTIVITY_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wall-clock budget for the whole run. `Duration::MAX` means unlimited
    /// (the config's `time_limit = 0` sentinel).
    pub task_timeout: Duration,
    pub activity_update_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(60 * 60),
            activity_update_interval: ACTIVITY_UPDATE_INTERVAL,
        }
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The agent process exited and its last event did not report an error.
    Completed,
    /// The agent reported an error, or the process exited and the harness
    /// could not confirm success.
    Failed(String),
    /// The task exceeded its wall-clock budget; the agent was killed.
    TimedOut,
    /// The run was cancelled externally; the agent was killed.
    Cancelled,
}

/// Spawn `task` on `harness` and supervise it to completion.
///
/// Races, in one `tokio::select!`:
/// - the harness's event stream (process exit, explicit error events)
/// - the change notifier (wakes the poll check early when something else
///   in the process wrote the DB; never itself a terminal signal)
/// - a 2s poll fallback via `is_running`, used whether or not the notifier
///   is live, since a harness's event stream can itself lag or drop
/// - the task's wall-clock timeout
/// - the supplied cancellation token
///
/// On every terminal path but `Completed`, the agent is killed via
/// `Harness::kill` before returning.
pub async fn supervise(
    pool: &SqlitePool,
    task: &MaterializedTask,
    harness: &Arc<dyn Harness>,
    notifier: &ChangeNotifier,
    cancel: CancellationToken,
    config: &SupervisorConfig,
) -> Result<SupervisorOutcome, CoError> {
    let handle = harness
        .spawn(task)
        .await
        .map_err(CoError::Transient)?;

    tracing::info!(task_id = %task.task_id, harness = harness.name(), pid = handle.pid, "spawned agent");

    let mut events = harness.events(&handle);
    let mut change_rx = notifier.subscribe();
    let mut activity_ticker = tokio::time::interval(config.activity_update_interval);
    activity_ticker.tick().await; // first tick fires immediately, skip it

    let deadline = tokio::time::Instant::now() + config.task_timeout;
    let mut last_error: Option<String> = None;

    let outcome = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                break SupervisorOutcome::Cancelled;
            }

            _ = tokio::time::sleep_until(deadline) => {
                break SupervisorOutcome::TimedOut;
            }

            event = events.next() => {
                match event {
                    Some(AgentEvent::Completed) => {
                        break match last_error {
                            Some(message) => SupervisorOutcome::Failed(message),
                            None => SupervisorOutcome::Completed,
                        };
                    }
                    Some(AgentEvent::Error { message }) => {
                        last_error = Some(message);
                    }
                    Some(_) => {
                        touch_activity(pool, &task.task_id).await;
                    }
                    None => {
                        // Stream ended without an explicit Completed event;
                        // fall through to the poll check to confirm exit.
                        if !harness.is_running(&handle).await {
                            break match last_error {
                                Some(message) => SupervisorOutcome::Failed(message),
                                None => SupervisorOutcome::Completed,
                            };
                        }
                    }
                }
            }

            changed = change_rx.recv() => {
                if changed.is_ok() && !harness.is_running(&handle).await {
                    break match last_error {
                        Some(message) => SupervisorOutcome::Failed(message),
                        None => SupervisorOutcome::Completed,
                    };
                }
            }

            _ = tokio::time::sleep(POLL_FALLBACK_INTERVAL) => {
                if !harness.is_running(&handle).await {
                    break match last_error {
                        Some(message) => SupervisorOutcome::Failed(message),
                        None => SupervisorOutcome::Completed,
                    };
                }
            }

            _ = activity_ticker.tick() => {
                touch_activity(pool, &task.task_id).await;
            }
        }
    };

    if outcome != SupervisorOutcome::Completed {
        if let Err(err) = harness.kill(&handle).await {
            tracing::warn!(task_id = %task.task_id, error = %err, "error killing agent process");
        }
    }

    match &outcome {
        SupervisorOutcome::Completed => {
            tracing::info!(task_id = %task.task_id, "agent completed");
        }
        SupervisorOutcome::Failed(message) => {
            tracing::warn!(task_id = %task.task_id, message, "agent failed");
        }
        SupervisorOutcome::TimedOut => {
            tracing::warn!(task_id = %task.task_id, "agent timed out, killed");
        }
        SupervisorOutcome::Cancelled => {
            tracing::info!(task_id = %task.task_id, "agent cancelled, killed");
        }
    }

    Ok(outcome)
}

async fn touch_activity(pool: &SqlitePool, task_id: &str) {
    if let Err(err) = tasks::touch_last_activity(pool, task_id).await {
        tracing::debug!(task_id, error = %err, "failed to record task activity");
    }
}

/// Translate a [`SupervisorOutcome`] into the corresponding task-row
/// transition, as the work orchestrator (C6) does after `supervise`
/// returns. Kept here since it's the one place that needs to know both
/// vocabularies.
pub async fn apply_outcome(
    pool: &SqlitePool,
    task_id: &str,
    outcome: &SupervisorOutcome,
) -> Result<(), CoError> {
    match outcome {
        SupervisorOutcome::Completed => {
            tasks::complete_task(pool, task_id)
                .await
                .map_err(classify_db_error)?;
        }
        SupervisorOutcome::Failed(message) => {
            tasks::fail_task(pool, task_id, message)
                .await
                .map_err(classify_db_error)?;
        }
        SupervisorOutcome::TimedOut => {
            tasks::fail_task(pool, task_id, "timed out")
                .await
                .map_err(classify_db_error)?;
        }
        SupervisorOutcome::Cancelled => {
            tasks::fail_task(pool, task_id, "cancelled")
                .await
                .map_err(classify_db_error)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::pin::Pin;

    use async_trait::async_trait;
    use co_test_utils::create_test_db;
    use futures::Stream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use co_db::models::TaskType;
    use co_db::queries::{tasks as task_queries, works};

    use crate::harness::AgentHandle;

    /// A harness whose event stream and liveness are scripted by the test.
    struct ScriptedHarness {
        events: StdMutex<Option<Vec<AgentEvent>>>,
        running_after_stream: AtomicBool,
    }

    impl ScriptedHarness {
        fn new(events: Vec<AgentEvent>, running_after_stream: bool) -> Self {
            Self {
                events: StdMutex::new(Some(events)),
                running_after_stream: AtomicBool::new(running_after_stream),
            }
        }
    }

    #[async_trait]
    impl Harness for ScriptedHarness {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn spawn(&self, task: &MaterializedTask) -> anyhow::Result<AgentHandle> {
            Ok(AgentHandle {
                pid: 1,
                stdin: None,
                task_id: task.task_id.clone(),
                attempt: 0,
                harness_name: "scripted".to_string(),
            })
        }

        fn events(&self, _handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
            let events = self.events.lock().unwrap().take().unwrap_or_default();
            Box::pin(futures::stream::iter(events))
        }

        async fn send(&self, _handle: &AgentHandle, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn kill(&self, _handle: &AgentHandle) -> anyhow::Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &AgentHandle) -> bool {
            self.running_after_stream.load(Ordering::SeqCst)
        }
    }

    async fn seed_task(pool: &SqlitePool) -> String {
        let work = works::create_work(pool, "work-1", "co/work-1", "main", None)
            .await
            .unwrap();
        let task = task_queries::create_task(pool, "work-1.1", &work.id, TaskType::Implement, &[], None, 0)
            .await
            .unwrap();
        task_queries::start_task(pool, &task.id).await.unwrap();
        task.id
    }

    fn test_task(task_id: &str) -> MaterializedTask {
        MaterializedTask {
            task_id: task_id.to_string(),
            name: "test".to_string(),
            description: "a task".to_string(),
            invariant_commands: vec![],
            working_dir: PathBuf::from("/tmp"),
            env_vars: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn completes_when_stream_emits_completed() {
        let pool = create_test_db().await;
        let task_id = seed_task(&pool).await;
        let harness: Arc<dyn Harness> = Arc::new(ScriptedHarness::new(
            vec![
                AgentEvent::Message {
                    role: "assistant".to_string(),
                    content: "working".to_string(),
                },
                AgentEvent::Completed,
            ],
            false,
        ));
        let notifier = ChangeNotifier::disabled();
        let cancel = CancellationToken::new();

        let outcome = supervise(
            &pool,
            &test_task(&task_id),
            &harness,
            &notifier,
            cancel,
            &SupervisorConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, SupervisorOutcome::Completed);
    }

    #[tokio::test]
    async fn error_event_before_completed_yields_failed() {
        let pool = create_test_db().await;
        let task_id = seed_task(&pool).await;
        let harness: Arc<dyn Harness> = Arc::new(ScriptedHarness::new(
            vec![
                AgentEvent::Error {
                    message: "agent exited non-zero".to_string(),
                },
                AgentEvent::Completed,
            ],
            false,
        ));
        let notifier = ChangeNotifier::disabled();

        let outcome = supervise(
            &pool,
            &test_task(&task_id),
            &harness,
            &notifier,
            CancellationToken::new(),
            &SupervisorConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            SupervisorOutcome::Failed("agent exited non-zero".to_string())
        );
    }

    #[tokio::test]
    async fn cancellation_wins_the_race() {
        let pool = create_test_db().await;
        let task_id = seed_task(&pool).await;
        // Never-ending stream; is_running stays true so the only way out
        // is cancellation.
        let harness: Arc<dyn Harness> = Arc::new(ScriptedHarness::new(vec![], true));
        let notifier = ChangeNotifier::disabled();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = supervise(
            &pool,
            &test_task(&task_id),
            &harness,
            &notifier,
            cancel,
            &SupervisorConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, SupervisorOutcome::Cancelled);
    }

    #[tokio::test]
    async fn apply_outcome_completed_transitions_task() {
        let pool = create_test_db().await;
        let task_id = seed_task(&pool).await;

        apply_outcome(&pool, &task_id, &SupervisorOutcome::Completed)
            .await
            .unwrap();

        let task = task_queries::get_task(&pool, &task_id).await.unwrap().unwrap();
        assert_eq!(task.status, co_db::models::TaskStatus::Completed);
    }
}
