//! Shared test utilities for `co` integration tests.
//!
//! Unlike a server-backed database, the embedded SQLite store needs no
//! shared container: every test gets its own temp-file-backed database,
//! migrated fresh. The temp file (rather than `sqlite::memory:`) is
//! deliberate -- it lets tests exercise the real WAL-file change-notifier
//! path the same way the control plane does in production.

use co_db::config::DbConfig;
use co_db::pool;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// A migrated, disposable database for a single test.
///
/// Holds the backing [`TempDir`] so the file (and its `-wal`/`-shm`
/// siblings) stay alive for the lifetime of the test; dropping this drops
/// the directory.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

impl TestDb {
    /// Create a fresh temp-file-backed database with all migrations applied.
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir for test database");
        let db_path = dir.path().join("tracking.db");
        let config = DbConfig::new(db_path);

        let pool = pool::create_pool(&config)
            .await
            .expect("failed to create test database pool");
        pool::run_migrations(&pool)
            .await
            .expect("test database migrations should succeed");

        Self { pool, _dir: dir }
    }
}

/// Convenience wrapper for tests that only need the pool.
pub async fn create_test_db() -> SqlitePool {
    TestDb::new().await.pool
}
