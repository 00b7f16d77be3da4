//! The shared error taxonomy used across `co-core`.
//!
//! Repositories and collaborators classify failures into one of these
//! kinds; the orchestrator, supervisor and control plane only ever
//! propagate [`CoError::Fatal`] upward -- everything else is captured into
//! a task/job row and the calling loop continues.

use thiserror::Error;

/// A classified error. Each variant carries its own retry/propagation
/// policy, documented inline below.
#[derive(Debug, Error)]
pub enum CoError {
    /// The requested row (task, work, scheduled job, ...) does not exist.
    /// Callers should return `None`/skip rather than retry.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness invariant was violated (duplicate bead, duplicate
    /// idempotency key). The single caller should fail; the queue itself
    /// treats a duplicate key as success.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A retryable condition (DB busy, subprocess spawn EAGAIN, forge 5xx).
    /// Bubbles up to the scheduler, which reschedules with backoff.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// The agent, Git, or forge reported a failure that will not resolve
    /// on its own (agent exited non-zero, merge conflict, forge 4xx). The
    /// owning task is failed with the message; there is no auto-retry.
    #[error("external failure: {0}")]
    ExternalFailure(String),

    /// An operation exceeded its allotted wall-clock budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unrecoverable: corrupted schema, unreadable config. The control
    /// plane aborts the process.
    #[error("fatal: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl From<sqlx::Error> for CoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CoError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                CoError::Conflict(err.to_string())
            }
            _ => CoError::Transient(err.into()),
        }
    }
}

/// Classify an `anyhow::Error` coming out of a `co-db` query function
/// (which wraps the underlying `sqlx::Error` with `.context(...)`) into a
/// [`CoError`]. Falls back to [`CoError::Transient`] when the source isn't
/// a `sqlx::Error` at all.
pub fn classify_db_error(err: anyhow::Error) -> CoError {
    match err.root_cause().downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::RowNotFound) => CoError::NotFound(err.to_string()),
        Some(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            CoError::Conflict(err.to_string())
        }
        _ => CoError::Transient(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_classifies_as_not_found() {
        let err: CoError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoError::NotFound(_)));
    }

    #[test]
    fn display_messages_carry_the_kind() {
        let err = CoError::Timeout("task exceeded 60m budget".to_string());
        assert!(err.to_string().contains("timeout"));
    }
}
