//! `co status` command: show work progress and per-task status.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use co_db::queries::tasks as task_db;
use co_db::queries::works as work_db;

/// Run the status command.
///
/// When `work_id` is `Some`, shows detailed status for that work. When
/// `None`, lists every work with a progress summary.
pub async fn run_status(pool: &SqlitePool, work_id: Option<&str>) -> Result<()> {
    match work_id {
        Some(id) => run_work_status(pool, id).await,
        None => run_fleet_status(pool).await,
    }
}

async fn run_work_status(pool: &SqlitePool, work_id: &str) -> Result<()> {
    let work = work_db::get_work(pool, work_id)
        .await?
        .with_context(|| format!("work {work_id} not found"))?;

    println!("Work: {} ({})", work.branch_name, work.id);
    println!("Status: {}", work.status);
    println!("Base branch: {}", work.base_branch);
    if let Some(worktree_path) = &work.worktree_path {
        println!("Worktree: {worktree_path}");
    }
    if let Some(pr_url) = &work.pr_url {
        println!("PR: {pr_url}");
    }
    if let Some(started_at) = work.started_at {
        println!("Started: {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed_at) = work.completed_at {
        println!("Completed: {}", completed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    let progress = task_db::get_work_progress(pool, work_id).await?;
    println!(
        "Progress: {}/{} completed",
        progress.completed, progress.total
    );
    println!(
        "  pending={} processing={} completed={} failed={}",
        progress.pending, progress.processing, progress.completed, progress.failed,
    );
    println!();

    let tasks = task_db::list_tasks_for_work(pool, work_id).await?;
    println!("Tasks:");
    for task in &tasks {
        let status_icon = match task.status.to_string().as_str() {
            "pending" => ".",
            "processing" => "*",
            "completed" => "+",
            "failed" => "!",
            _ => " ",
        };
        println!("  [{}] {} ({})", status_icon, task.task_type, task.status);
        if let Some(error) = &task.error_message {
            println!("      error: {error}");
        }
    }

    Ok(())
}

async fn run_fleet_status(pool: &SqlitePool) -> Result<()> {
    let works = work_db::list_works(pool, None).await?;

    if works.is_empty() {
        println!("No works found.");
        return Ok(());
    }

    println!("{:<38} {:<30} {:<12} {:>10}", "ID", "BRANCH", "STATUS", "PROGRESS");
    println!("{}", "-".repeat(92));

    for work in &works {
        let progress = task_db::get_work_progress(pool, &work.id).await?;
        let progress_str = if progress.total > 0 {
            format!("{}/{}", progress.completed, progress.total)
        } else {
            "0/0".to_string()
        };
        let branch_display = if work.branch_name.len() > 28 {
            format!("{}...", &work.branch_name[..25])
        } else {
            work.branch_name.clone()
        };
        println!(
            "{:<38} {:<30} {:<12} {:>10}",
            work.id, branch_display, work.status, progress_str
        );
    }

    Ok(())
}
