//! `.co/config.toml` parsing: one typed struct per section, each with a
//! `Default` impl carrying the documented defaults. Loading resolves a
//! missing file straight to defaults rather than erroring, so a project
//! with no config file yet still runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The parsed contents of `.co/config.toml`. Every section is optional in
/// the file itself (`#[serde(default)]`); a missing file resolves to every
/// section's `Default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub repo: RepoSection,
    #[serde(default)]
    pub beads: BeadsSection,
    #[serde(default)]
    pub hooks: HooksSection,
    #[serde(default)]
    pub claude: ClaudeSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub zellij: ZellijSection,
    #[serde(default)]
    pub log_parser: LogParserSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoSection {
    pub main_path: Option<PathBuf>,
    pub base_branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeadsSection {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksSection {
    pub pre_pr: Option<String>,
    pub post_merge: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogParserModel {
    Haiku,
    Sonnet,
    Opus,
}

impl Default for LogParserModel {
    fn default() -> Self {
        Self::Haiku
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSection {
    #[serde(default = "ClaudeSection::default_skip_permissions")]
    pub skip_permissions: bool,
    /// Minutes; `0` means unlimited.
    #[serde(default)]
    pub time_limit: u64,
    #[serde(default = "ClaudeSection::default_task_timeout_minutes")]
    pub task_timeout_minutes: u64,
}

impl ClaudeSection {
    fn default_skip_permissions() -> bool {
        true
    }

    fn default_task_timeout_minutes() -> u64 {
        60
    }
}

impl Default for ClaudeSection {
    fn default() -> Self {
        Self {
            skip_permissions: Self::default_skip_permissions(),
            time_limit: 0,
            task_timeout_minutes: Self::default_task_timeout_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "WorkflowSection::default_max_review_iterations")]
    pub max_review_iterations: u32,
}

impl WorkflowSection {
    fn default_max_review_iterations() -> u32 {
        2
    }
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_review_iterations: Self::default_max_review_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "SchedulerSection::default_pr_feedback_interval_minutes")]
    pub pr_feedback_interval_minutes: u64,
    #[serde(default = "SchedulerSection::default_comment_resolution_interval_minutes")]
    pub comment_resolution_interval_minutes: u64,
    #[serde(default = "SchedulerSection::default_scheduler_poll_seconds")]
    pub scheduler_poll_seconds: u64,
    #[serde(default = "SchedulerSection::default_activity_update_seconds")]
    pub activity_update_seconds: u64,
    #[serde(default = "SchedulerSection::default_processing_timeout_minutes")]
    pub processing_timeout_minutes: u64,
    #[serde(default = "SchedulerSection::default_stale_check_interval_minutes")]
    pub stale_check_interval_minutes: u64,
}

impl SchedulerSection {
    fn default_pr_feedback_interval_minutes() -> u64 {
        5
    }
    fn default_comment_resolution_interval_minutes() -> u64 {
        5
    }
    fn default_scheduler_poll_seconds() -> u64 {
        1
    }
    fn default_activity_update_seconds() -> u64 {
        30
    }
    fn default_processing_timeout_minutes() -> u64 {
        120
    }
    fn default_stale_check_interval_minutes() -> u64 {
        5
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            pr_feedback_interval_minutes: Self::default_pr_feedback_interval_minutes(),
            comment_resolution_interval_minutes: Self::default_comment_resolution_interval_minutes(),
            scheduler_poll_seconds: Self::default_scheduler_poll_seconds(),
            activity_update_seconds: Self::default_activity_update_seconds(),
            processing_timeout_minutes: Self::default_processing_timeout_minutes(),
            stale_check_interval_minutes: Self::default_stale_check_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZellijSection {
    #[serde(default = "ZellijSection::default_kill_tabs_on_destroy")]
    pub kill_tabs_on_destroy: bool,
}

impl ZellijSection {
    fn default_kill_tabs_on_destroy() -> bool {
        true
    }
}

impl Default for ZellijSection {
    fn default() -> Self {
        Self {
            kill_tabs_on_destroy: Self::default_kill_tabs_on_destroy(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogParserSection {
    #[serde(default)]
    pub use_claude: bool,
    #[serde(default)]
    pub model: LogParserModel,
}

// -----------------------------------------------------------------------
// Load / resolve
// -----------------------------------------------------------------------

/// Default relative location of the config file within a project root.
pub const DEFAULT_CONFIG_PATH: &str = ".co/config.toml";

/// Load `.co/config.toml` from `project_root`. A missing file is not an
/// error: every section resolves to its documented default.
pub fn load_config(project_root: &Path) -> Result<ConfigFile> {
    let path = project_root.join(DEFAULT_CONFIG_PATH);
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}
