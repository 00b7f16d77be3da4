//! Change notifier (C9): a single-process pub/sub bus that tells
//! interested components "the tracking DB changed, re-query". Subscribers
//! never learn *what* changed, only that something did -- they re-derive
//! state from the store rather than trying to diff or parse what changed.
//!
//! Fed by a [`notify`] filesystem watcher on the database's `-wal` file
//! (every write appends there under WAL journaling before a checkpoint).
//! If the watcher fails to start (platform, permissions), subscribers fall
//! back to a timed poll -- the notifier is an optimization, never a
//! correctness dependency.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

/// An opaque signal that the tracking database changed. Carries no
/// payload: subscribers always re-query.
#[derive(Debug, Clone, Copy)]
pub struct DbChanged;

/// How often a subscriber should poll when no notifier event has arrived,
/// used both as the watcher's own fallback and as the cadence callers
/// should apply to their own `tokio::time::interval` when the notifier
/// could not be constructed at all.
pub const POLL_FALLBACK_INTERVAL: Duration = Duration::from_secs(2);

/// Handle to the change notifier. Cloning shares the same broadcast
/// channel; the underlying filesystem watcher (if any) is kept alive for
/// as long as one `ChangeNotifier` handle exists.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<DbChanged>,
    // Kept alive only to hold the watcher's background thread open; never
    // read directly.
    _watcher: Option<Arc<RecommendedWatcher>>,
}

impl ChangeNotifier {
    /// Start watching `db_path`'s WAL file for writes. If the watch cannot
    /// be established, returns a notifier with no live watcher: subscribers
    /// will simply never receive an event and must fall back to polling on
    /// [`POLL_FALLBACK_INTERVAL`].
    pub fn watch(db_path: &Path) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        let wal_path = wal_path_for(db_path);

        let watcher = build_watcher(&wal_path, tx.clone());
        match watcher {
            Ok(watcher) => {
                tracing::info!(wal = %wal_path.display(), "change notifier watching WAL file");
                Self {
                    tx,
                    _watcher: Some(Arc::new(watcher)),
                }
            }
            Err(err) => {
                tracing::warn!(
                    wal = %wal_path.display(),
                    error = %err,
                    "failed to start change notifier watcher, subscribers will poll"
                );
                Self { tx, _watcher: None }
            }
        }
    }

    /// A notifier with no backing watcher at all, for tests and for
    /// callers that only want the poll fallback.
    pub fn disabled() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx, _watcher: None }
    }

    /// Whether a filesystem watcher is actually live (vs. poll-only).
    pub fn is_live(&self) -> bool {
        self._watcher.is_some()
    }

    /// Subscribe to change notifications. Delivery is at-least-once and
    /// unordered beyond "after the change"; a lagging subscriber that
    /// misses events should simply re-query on its next wakeup rather than
    /// treat the lag as an error.
    pub fn subscribe(&self) -> broadcast::Receiver<DbChanged> {
        self.tx.subscribe()
    }

    /// Manually publish a change notification. Used by in-process writers
    /// that know they just mutated the store and want subscribers woken
    /// immediately rather than waiting on the filesystem watcher's latency.
    pub fn notify(&self) {
        let _ = self.tx.send(DbChanged);
    }
}

fn wal_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}

fn build_watcher(
    wal_path: &Path,
    tx: broadcast::Sender<DbChanged>,
) -> notify::Result<RecommendedWatcher> {
    // The WAL file may not exist yet (no writes since the last checkpoint,
    // or a brand-new database); watch its parent directory instead so the
    // watch survives the file being created, truncated, or checkpointed
    // away and recreated.
    let watch_target = wal_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            if event.kind.is_modify() || event.kind.is_create() {
                let _ = tx.send(DbChanged);
            }
        }
    })?;

    watcher.watch(&watch_target, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
