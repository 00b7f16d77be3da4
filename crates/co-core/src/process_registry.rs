//! Process-liveness registry (C3): register/heartbeat/liveness for the
//! control plane and per-work orchestrator processes.
//!
//! Thin wrapper over `co_db::queries::processes` -- the uniqueness
//! invariants (singleton control plane, one orchestrator per work) are
//! enforced by the table's partial unique indexes, not here; a duplicate
//! registration surfaces as a `CoError::Conflict` that the caller should
//! treat as "someone else is already live for this role".

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use co_db::models::{Process, ProcessType};
use co_db::queries::processes;

use crate::error::{classify_db_error, CoError};

/// Heartbeat cadence every live process ticks on.
pub const HEARTBEAT_INTERVAL_SECS: i64 = 10;

/// Register this process in the `processes` table.
pub async fn register(
    pool: &SqlitePool,
    id: &str,
    process_type: ProcessType,
    work_id: Option<&str>,
    pid: i64,
    hostname: &str,
) -> Result<Process, CoError> {
    processes::register_process(pool, id, process_type, work_id, pid, hostname)
        .await
        .map_err(classify_db_error)
}

/// Record a heartbeat for this process. Returns `false` if the row is
/// gone (e.g. evicted by the stale reaper) -- the caller should
/// re-register rather than loop forever heartbeating a row that no longer
/// exists.
pub async fn heartbeat(pool: &SqlitePool, id: &str) -> Result<bool, CoError> {
    let rows = processes::heartbeat(pool, id).await.map_err(classify_db_error)?;
    Ok(rows > 0)
}

/// Whether a fresh orchestrator is already registered for `work_id`: a row
/// whose heartbeat is newer than `2 * HEARTBEAT_INTERVAL_SECS` ago.
///
/// `spawn_orchestrator` retries on failure, but a slow forge call might
/// mean an orchestrator from an
/// earlier attempt is still alive. Gating on heartbeat freshness lets the
/// spawn handler refuse to start a second one.
pub async fn has_live_orchestrator(pool: &SqlitePool, work_id: &str) -> Result<bool, CoError> {
    let cutoff = staleness_cutoff(Utc::now());
    processes::has_live_orchestrator(pool, work_id, cutoff)
        .await
        .map_err(classify_db_error)
}

pub async fn get_orchestrator_for_work(
    pool: &SqlitePool,
    work_id: &str,
) -> Result<Option<Process>, CoError> {
    processes::get_process_for_work(pool, work_id)
        .await
        .map_err(classify_db_error)
}

pub async fn get_control_plane(pool: &SqlitePool) -> Result<Option<Process>, CoError> {
    processes::get_control_plane(pool).await.map_err(classify_db_error)
}

/// Processes whose heartbeat is older than `2 * HEARTBEAT_INTERVAL_SECS`
/// -- candidates for the stale reaper to evict.
pub async fn list_stale(pool: &SqlitePool) -> Result<Vec<Process>, CoError> {
    let cutoff = staleness_cutoff(Utc::now());
    processes::list_stale_processes(pool, cutoff)
        .await
        .map_err(classify_db_error)
}

pub async fn deregister(pool: &SqlitePool, id: &str) -> Result<(), CoError> {
    processes::remove_process(pool, id).await.map_err(classify_db_error)
}

fn staleness_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(2 * HEARTBEAT_INTERVAL_SECS)
}

/// Best-effort local hostname for process registration. Falls back to
/// `"unknown"` rather than failing registration over a cosmetic field.
#[cfg(unix)]
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

#[cfg(not(unix))]
pub fn local_hostname() -> String {
    "unknown".to_string()
}
