mod config;
mod status_cmd;
mod work_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use co_core::control_plane::{self, ControlPlaneConfig};
use co_core::forge::InMemoryForge;
use co_core::harness::{ClaudeCodeAdapter, HarnessRegistry};
use co_core::issue_tracker::InMemoryIssueTracker;
use co_core::notifier::ChangeNotifier;
use co_core::orchestrator::{self, OrchestratorConfig, OrchestratorDeps};
use co_core::scheduler::{ProcessOrchestratorSpawner, SchedulerHandlers};
use co_core::worktree::WorktreeManager;
use co_db::pool;

#[derive(Parser)]
#[command(name = "co", about = "LLM coding agent fleet orchestrator")]
struct Cli {
    /// Project root (defaults to the current directory). Both `.co/config.toml`
    /// and `.co/tracking.db` are resolved relative to this path.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the project's control plane: the scheduler drain, PR-feedback and
    /// comment-resolution pollers, and stale-process reaper. One per project.
    ControlPlane,
    /// Run the orchestrator for a single work to completion.
    Orchestrator {
        /// The work's id.
        work_id: String,
    },
    #[command(subcommand)]
    Work(WorkCommands),
    /// Show work progress, or detailed per-task status for one work.
    Status {
        /// Show detail for this work only; omit to list every work.
        work_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkCommands {
    /// Register a new unit of work and queue its worktree + orchestrator jobs.
    Create {
        /// Branch name for the work (e.g. `co/add-auth`).
        branch_name: String,
        /// Base branch to branch from and eventually merge into.
        #[arg(long, default_value = "main")]
        base_branch: String,
        /// Root issue id in the external issue tracker, if any.
        #[arg(long)]
        root_issue_id: Option<String>,
        /// Bead id to attach to this work's seed task. Repeat for multiple.
        #[arg(long = "bead")]
        bead_ids: Vec<String>,
    },
}

fn init_logging(project_root: &std::path::Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = project_root.join(".co");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "debug.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr.and(non_blocking))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_root = cli
        .project
        .clone()
        .map(Ok)
        .unwrap_or_else(|| std::env::current_dir().context("failed to read current directory"))?;

    // Held for the lifetime of the process so the rolling-file writer keeps
    // flushing; dropping it would silently stop the file sink.
    let _log_guard = init_logging(&project_root)?;

    let resolved = config::resolve(Some(project_root.clone()))?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let result = match cli.command {
        Commands::ControlPlane => run_control_plane(db_pool.clone(), &resolved).await,
        Commands::Orchestrator { work_id } => run_orchestrator_cmd(db_pool.clone(), &resolved, work_id).await,
        Commands::Work(WorkCommands::Create {
            branch_name,
            base_branch,
            root_issue_id,
            bead_ids,
        }) => {
            let work_id = work_cmd::run_create(
                &db_pool,
                &branch_name,
                &base_branch,
                root_issue_id.as_deref(),
                &bead_ids,
            )
            .await?;
            println!("{work_id}");
            Ok(())
        }
        Commands::Status { work_id } => status_cmd::run_status(&db_pool, work_id.as_deref()).await,
    };

    db_pool.close().await;

    if let Err(err) = &result {
        tracing::error!(error = %err, "co exited with an error");
    }
    result
}

async fn run_control_plane(db_pool: sqlx::SqlitePool, resolved: &config::ResolvedConfig) -> Result<()> {
    let repo_path = resolved
        .config
        .repo
        .main_path
        .clone()
        .unwrap_or_else(|| resolved.project_root.clone());
    let worktree = WorktreeManager::new(repo_path, None)
        .context("failed to initialize worktree manager for control plane")?;

    let handlers = SchedulerHandlers {
        forge: Arc::new(InMemoryForge::new()),
        worktree,
        spawner: Arc::new(ProcessOrchestratorSpawner),
        issue_tracker: Arc::new(InMemoryIssueTracker::new()),
    };

    let notifier = ChangeNotifier::watch(&resolved.db_config.database_path);
    let config = ControlPlaneConfig::from_config(&resolved.config);
    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal, cancelling control plane");
            shutdown_cancel.cancel();
        }
    });

    control_plane::run(db_pool, handlers, notifier, config, cancel)
        .await
        .map_err(anyhow::Error::from)
}

async fn run_orchestrator_cmd(
    db_pool: sqlx::SqlitePool,
    resolved: &config::ResolvedConfig,
    work_id: String,
) -> Result<()> {
    let mut registry = HarnessRegistry::new();
    registry.register(ClaudeCodeAdapter::new());

    let deps = OrchestratorDeps {
        registry: Arc::new(registry),
        forge: Arc::new(InMemoryForge::new()),
        issue_tracker: Arc::new(InMemoryIssueTracker::new()),
    };

    let notifier = ChangeNotifier::watch(&resolved.db_config.database_path);
    let config = OrchestratorConfig::from_config(&resolved.config);
    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    let shutdown_work_id = work_id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(work_id = %shutdown_work_id, "received shutdown signal, cancelling orchestrator");
            shutdown_cancel.cancel();
        }
    });

    orchestrator::run_orchestrator(db_pool, work_id, deps, notifier, config, cancel)
        .await
        .map(|_| ())
        .map_err(anyhow::Error::from)
}
