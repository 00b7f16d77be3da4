//! Embedded schema migrations.
//!
//! Unlike the `sqlx::migrate!()` macro (which reads `.sql` files from a
//! directory and tracks them via its own `_sqlx_migrations` table), `co`
//! stores each migration's down-SQL alongside its up-SQL so that recovery
//! tooling can roll a migration back without shipping a matching `.down.sql`
//! file. See [`crate::pool::run_migrations`] for the runner.

/// A single numbered, named, forward/backward schema migration.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

pub fn all() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "create_works_and_tasks",
            up_sql: include_str!("../migrations/0001_create_works_and_tasks.up.sql"),
            down_sql: include_str!("../migrations/0001_create_works_and_tasks.down.sql"),
        },
        Migration {
            version: 2,
            name: "create_beads_and_dependencies",
            up_sql: include_str!("../migrations/0002_create_beads_and_dependencies.up.sql"),
            down_sql: include_str!("../migrations/0002_create_beads_and_dependencies.down.sql"),
        },
        Migration {
            version: 3,
            name: "create_scheduler_and_feedback",
            up_sql: include_str!("../migrations/0003_create_scheduler_and_feedback.up.sql"),
            down_sql: include_str!("../migrations/0003_create_scheduler_and_feedback.down.sql"),
        },
        Migration {
            version: 4,
            name: "create_processes_and_recovery",
            up_sql: include_str!("../migrations/0004_create_processes_and_recovery.up.sql"),
            down_sql: include_str!("../migrations/0004_create_processes_and_recovery.down.sql"),
        },
    ]
}
