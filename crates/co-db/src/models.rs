use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a work -- a unit of user intent, typically one branch + one PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Merged,
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Merged => "merged",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkStatus {
    type Err = WorkStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "merged" => Ok(Self::Merged),
            other => Err(WorkStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`WorkStatus`] string.
#[derive(Debug, Clone)]
pub struct WorkStatusParseError(pub String);

impl fmt::Display for WorkStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid work status: {:?}", self.0)
    }
}

impl std::error::Error for WorkStatusParseError {}

// ---------------------------------------------------------------------------

/// Typed kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Implement,
    Estimate,
    Review,
    Pr,
    UpdatePrDescription,
    LogAnalysis,
    Plan,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Implement => "implement",
            Self::Estimate => "estimate",
            Self::Review => "review",
            Self::Pr => "pr",
            Self::UpdatePrDescription => "update_pr_description",
            Self::LogAnalysis => "log_analysis",
            Self::Plan => "plan",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implement" => Ok(Self::Implement),
            "estimate" => Ok(Self::Estimate),
            "review" => Ok(Self::Review),
            "pr" => Ok(Self::Pr),
            "update_pr_description" => Ok(Self::UpdatePrDescription),
            "log_analysis" => Ok(Self::LogAnalysis),
            "plan" => Ok(Self::Plan),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskType`] string.
#[derive(Debug, Clone)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a single bead's membership in a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskBeadStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TaskBeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskBeadStatus {
    type Err = TaskBeadStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TaskBeadStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskBeadStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskBeadStatusParseError(pub String);

impl fmt::Display for TaskBeadStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task bead status: {:?}", self.0)
    }
}

impl std::error::Error for TaskBeadStatusParseError {}

// ---------------------------------------------------------------------------

/// Type of a durable scheduler job (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobType {
    PrFeedback,
    CommentResolution,
    GitPush,
    GithubComment,
    GithubResolveThread,
    CreateWorktree,
    SpawnOrchestrator,
    DestroyWorktree,
}

impl fmt::Display for ScheduledJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrFeedback => "pr_feedback",
            Self::CommentResolution => "comment_resolution",
            Self::GitPush => "git_push",
            Self::GithubComment => "github_comment",
            Self::GithubResolveThread => "github_resolve_thread",
            Self::CreateWorktree => "create_worktree",
            Self::SpawnOrchestrator => "spawn_orchestrator",
            Self::DestroyWorktree => "destroy_worktree",
        };
        f.write_str(s)
    }
}

impl FromStr for ScheduledJobType {
    type Err = ScheduledJobTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pr_feedback" => Ok(Self::PrFeedback),
            "comment_resolution" => Ok(Self::CommentResolution),
            "git_push" => Ok(Self::GitPush),
            "github_comment" => Ok(Self::GithubComment),
            "github_resolve_thread" => Ok(Self::GithubResolveThread),
            "create_worktree" => Ok(Self::CreateWorktree),
            "spawn_orchestrator" => Ok(Self::SpawnOrchestrator),
            "destroy_worktree" => Ok(Self::DestroyWorktree),
            other => Err(ScheduledJobTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ScheduledJobType`] string.
#[derive(Debug, Clone)]
pub struct ScheduledJobTypeParseError(pub String);

impl fmt::Display for ScheduledJobTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid scheduled job type: {:?}", self.0)
    }
}

impl std::error::Error for ScheduledJobTypeParseError {}

// ---------------------------------------------------------------------------

/// Status of a durable scheduler job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl fmt::Display for ScheduledJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ScheduledJobStatus {
    type Err = ScheduledJobStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ScheduledJobStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ScheduledJobStatus`] string.
#[derive(Debug, Clone)]
pub struct ScheduledJobStatusParseError(pub String);

impl fmt::Display for ScheduledJobStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid scheduled job status: {:?}", self.0)
    }
}

impl std::error::Error for ScheduledJobStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of liveness-registered process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    ControlPlane,
    Orchestrator,
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ControlPlane => "control_plane",
            Self::Orchestrator => "orchestrator",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessType {
    type Err = ProcessTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control_plane" => Ok(Self::ControlPlane),
            "orchestrator" => Ok(Self::Orchestrator),
            other => Err(ProcessTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProcessType`] string.
#[derive(Debug, Clone)]
pub struct ProcessTypeParseError(pub String);

impl fmt::Display for ProcessTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid process type: {:?}", self.0)
    }
}

impl std::error::Error for ProcessTypeParseError {}

// ---------------------------------------------------------------------------

/// Kind of recovery audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecoveryEventType {
    TaskReset,
    TaskStaleFailed,
    BeadPreserved,
    BeadReset,
}

impl fmt::Display for RecoveryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TaskReset => "task_reset",
            Self::TaskStaleFailed => "task_stale_failed",
            Self::BeadPreserved => "bead_preserved",
            Self::BeadReset => "bead_reset",
        };
        f.write_str(s)
    }
}

impl FromStr for RecoveryEventType {
    type Err = RecoveryEventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_reset" => Ok(Self::TaskReset),
            "task_stale_failed" => Ok(Self::TaskStaleFailed),
            "bead_preserved" => Ok(Self::BeadPreserved),
            "bead_reset" => Ok(Self::BeadReset),
            other => Err(RecoveryEventTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RecoveryEventType`] string.
#[derive(Debug, Clone)]
pub struct RecoveryEventTypeParseError(pub String);

impl fmt::Display for RecoveryEventTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid recovery event type: {:?}", self.0)
    }
}

impl std::error::Error for RecoveryEventTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A work -- a unit of user intent, typically one branch + one pull request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Work {
    pub id: String,
    pub status: WorkStatus,
    pub branch_name: String,
    pub base_branch: String,
    pub worktree_path: Option<String>,
    pub pr_url: Option<String>,
    pub root_issue_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A task -- a unit of agent work within a work, typed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub work_id: Option<String>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub complexity_budget: Option<i64>,
    pub actual_complexity: Option<i64>,
    pub worktree_path: Option<String>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub spawned_at: Option<DateTime<Utc>>,
    pub spawn_status: Option<String>,
}

/// Join row recording a task's position within its work's ordered list.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkTask {
    pub work_id: String,
    pub task_id: String,
    pub position: i64,
}

/// Membership of a bead (issue) in a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskBead {
    pub task_id: String,
    pub bead_id: String,
    pub status: TaskBeadStatus,
}

/// An edge in the task dependency DAG: `task_id` depends on `depends_on_task_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: String,
    pub depends_on_task_id: String,
}

/// Arbitrary string key/value metadata scoped to a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskMetadata {
    pub task_id: String,
    pub key: String,
    pub value: String,
}

/// A bead attached to a work, with optional co-scheduling group.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkBead {
    pub work_id: String,
    pub bead_id: String,
    pub group_id: i64,
    pub position: i64,
}

/// A durable job in the scheduler table (C4).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledJob {
    pub id: String,
    pub work_id: Option<String>,
    pub task_type: ScheduledJobType,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub status: ScheduledJobStatus,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub idempotency_key: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Inbound PR comment/CI feedback awaiting triage.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PrFeedback {
    pub id: String,
    pub work_id: String,
    pub pr_url: String,
    pub feedback_type: String,
    pub title: String,
    pub description: String,
    pub source: String,
    pub source_url: Option<String>,
    pub source_id: String,
    pub priority: i64,
    pub bead_id: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A liveness record for a control-plane or per-work orchestrator process.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Process {
    pub id: String,
    pub process_type: ProcessType,
    pub work_id: Option<String>,
    pub pid: i64,
    pub hostname: String,
    pub heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// An append-only audit record of a recovery reconciliation action.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecoveryEvent {
    pub id: i64,
    pub event_type: RecoveryEventType,
    pub task_id: Option<String>,
    pub work_id: Option<String>,
    pub bead_id: Option<String>,
    pub reason: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Advisory complexity-estimation cache for a bead.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ComplexityCache {
    pub bead_id: String,
    pub description_hash: String,
    pub complexity_score: f64,
    pub estimated_tokens: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
