use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Executor, Row, SqlitePool};
use tracing::info;

use crate::config::DbConfig;
use crate::migrations::{self, Migration};

/// Create a connection pool with sensible defaults for a single-writer
/// embedded database: a handful of reader connections, WAL journaling, and a
/// busy timeout so concurrent readers never see `SQLITE_BUSY` while the
/// control plane holds the write lock.
pub async fn create_pool(config: &DbConfig) -> Result<SqlitePool> {
    if let Some(dir) = config.parent_dir() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create database directory {}", dir.display()))?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.connect_url())
        .await
        .with_context(|| {
            format!(
                "failed to connect to database at {}",
                config.database_path.display()
            )
        })?;

    pool.execute("PRAGMA journal_mode = WAL;")
        .await
        .context("failed to enable WAL journal mode")?;
    pool.execute("PRAGMA busy_timeout = 5000;")
        .await
        .context("failed to set busy_timeout")?;
    pool.execute("PRAGMA foreign_keys = ON;")
        .await
        .context("failed to enable foreign key enforcement")?;

    Ok(pool)
}

/// Run all pending migrations in version order against the pool.
///
/// Each migration's up-SQL (and, on a failed apply, nothing — failures abort
/// the whole run) executes inside a single transaction alongside the
/// bookkeeping insert into `schema_migrations`, so a crash mid-migration
/// never leaves the version row and the schema change out of sync. Already
/// applied versions are skipped, so this is safe to call on every process
/// start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    ensure_schema_migrations_table(pool).await?;

    let applied = applied_versions(pool).await?;

    for migration in migrations::all() {
        if applied.contains(&migration.version) {
            continue;
        }
        apply_migration(pool, &migration).await?;
        info!(version = migration.version, name = migration.name, "migration applied");
    }

    Ok(())
}

async fn ensure_schema_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations ( \
            version     INTEGER PRIMARY KEY, \
            name        TEXT NOT NULL, \
            down_sql    TEXT NOT NULL, \
            applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
        )",
    )
    .await
    .context("failed to create schema_migrations table")?;
    Ok(())
}

async fn applied_versions(pool: &SqlitePool) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await
        .context("failed to read schema_migrations")?;
    Ok(rows.into_iter().map(|r| r.get::<i64, _>(0)).collect())
}

#[cfg(unix)]
const MIGRATION_BLOCKED_SIGNALS: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];
#[cfg(not(unix))]
const MIGRATION_BLOCKED_SIGNALS: [i32; 0] = [];

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let _signal_mask = SignalMask::block(&MIGRATION_BLOCKED_SIGNALS)
        .with_context(|| format!("failed to mask signals for migration {}", migration.version))?;

    let mut tx = pool
        .begin()
        .await
        .with_context(|| format!("failed to begin transaction for migration {}", migration.version))?;

    for stmt in split_statements(migration.up_sql) {
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "failed to apply migration {} ({}): statement {:?}",
                    migration.version, migration.name, stmt
                )
            })?;
    }

    sqlx::query(
        "INSERT INTO schema_migrations (version, name, down_sql) VALUES (?, ?, ?)",
    )
    .bind(migration.version)
    .bind(migration.name)
    .bind(migration.down_sql)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to record migration {}", migration.version))?;

    tx.commit()
        .await
        .with_context(|| format!("failed to commit migration {}", migration.version))?;

    Ok(())
}

/// Blocks a set of signals on the calling thread for its lifetime, restoring
/// the prior mask on drop. Used to keep a `SIGINT`/`SIGTERM` arriving mid-
/// migration from tearing down the process between the transaction's
/// statements and its commit -- the signal is simply deferred until the
/// migration finishes and the mask is restored.
#[cfg(unix)]
struct SignalMask {
    previous: libc::sigset_t,
}

#[cfg(unix)]
impl SignalMask {
    fn block(signals: &[libc::c_int]) -> Result<Self> {
        unsafe {
            let mut to_block: libc::sigset_t = std::mem::zeroed();
            let mut previous: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut to_block);
            for &sig in signals {
                libc::sigaddset(&mut to_block, sig);
            }
            if libc::pthread_sigmask(libc::SIG_BLOCK, &to_block, &mut previous) != 0 {
                anyhow::bail!("pthread_sigmask(SIG_BLOCK) failed: {}", std::io::Error::last_os_error());
            }
            Ok(Self { previous })
        }
    }
}

#[cfg(unix)]
impl Drop for SignalMask {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, std::ptr::null_mut());
        }
    }
}

/// Non-Unix targets have no `sigprocmask`-equivalent thread signal mask;
/// this is an empty stand-in rather than a real mask.
#[cfg(not(unix))]
struct SignalMask;

#[cfg(not(unix))]
impl SignalMask {
    fn block(_signals: &[i32]) -> Result<Self> {
        Ok(Self)
    }
}

/// Split a SQL script into individual statements on top-level `;`
/// terminators.
///
/// Honors single-quoted, double-quoted, and backtick-quoted string literals
/// (a `;` inside one is not a separator), `--` line comments, and `/* */`
/// block comments, so default expressions and literal text containing
/// semicolons survive. Empty statements (blank lines, comment-only segments)
/// are dropped.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.char_indices().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;

    while let Some((_, c)) = chars.next() {
        if in_single {
            current.push(c);
            if c == '\'' {
                in_single = false;
            }
            continue;
        }
        if in_double {
            current.push(c);
            if c == '"' {
                in_double = false;
            }
            continue;
        }
        if in_backtick {
            current.push(c);
            if c == '`' {
                in_backtick = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_single = true;
                current.push(c);
            }
            '"' => {
                in_double = true;
                current.push(c);
            }
            '`' => {
                in_backtick = true;
                current.push(c);
            }
            '-' if chars.peek().map(|(_, n)| *n) == Some('-') => {
                chars.next();
                for (_, nc) in chars.by_ref() {
                    if nc == '\n' {
                        break;
                    }
                }
                current.push(' ');
            }
            '/' if chars.peek().map(|(_, n)| *n) == Some('*') => {
                chars.next();
                let mut prev = '\0';
                for (_, nc) in chars.by_ref() {
                    if prev == '*' && nc == '/' {
                        break;
                    }
                    prev = nc;
                }
                current.push(' ');
            }
            ';' => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    statements.push(trimmed.to_owned());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_owned());
    }

    statements
}

/// Return the row count for every user table in the database (excludes
/// `schema_migrations` and SQLite's own internal tables).
pub async fn table_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' \
           AND name NOT LIKE 'sqlite_%' \
           AND name != 'schema_migrations' \
         ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .context("failed to list tables")?;

    let mut counts = Vec::with_capacity(tables.len());
    for (table_name,) in &tables {
        // Table names come from sqlite_master so they are safe identifiers.
        let query = format!("SELECT COUNT(*) FROM {table_name}");
        let count: (i64,) = sqlx::query_as(&query)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table_name}"))?;
        counts.push((table_name.clone(), count.0));
    }
    Ok(counts)
}
