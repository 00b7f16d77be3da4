//! Project-root resolution for the `co` CLI.
//!
//! `co` is project-scoped: both the tracking database and `config.toml`
//! live under `.co/` in the project root, rather than under a global
//! per-user config directory. There is no environment-variable override
//! for "which project" the way there is for a database connection string,
//! so resolving the root itself is just a CLI flag falling back to the
//! current directory.

use std::path::PathBuf;

use anyhow::{Context, Result};

use co_core::config::ConfigFile;
use co_db::config::DbConfig;

/// Everything resolved from a project root: its config file (or defaults)
/// and the database it points at.
pub struct ResolvedConfig {
    pub project_root: PathBuf,
    pub config: ConfigFile,
    pub db_config: DbConfig,
}

/// Resolve a project root and load its config + database location.
///
/// `project_root_flag` is the CLI's `--project` override; `None` resolves
/// to the current working directory.
pub fn resolve(project_root_flag: Option<PathBuf>) -> Result<ResolvedConfig> {
    let project_root = match project_root_flag {
        Some(path) => path,
        None => std::env::current_dir().context("failed to read current directory")?,
    };

    let config = co_core::config::load_config(&project_root)
        .with_context(|| format!("failed to load config under {}", project_root.display()))?;

    let db_config = DbConfig::new(project_root.join(".co/tracking.db"));

    Ok(ResolvedConfig {
        project_root,
        config,
        db_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_to_default_db_path_under_project_root() {
        let tmp = tempfile::tempdir().unwrap();
        let resolved = resolve(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(
            resolved.db_config.database_path,
            tmp.path().join(".co/tracking.db")
        );
    }

    #[test]
    fn missing_config_file_resolves_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let resolved = resolve(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(resolved.config.workflow.max_review_iterations, 2);
    }
}
