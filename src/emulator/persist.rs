//! State persistence.
//!
//! The whole emulator state is one JSON document, replaced atomically
//! (write a temp sibling, then rename). Mutations queue snapshots to a
//! dedicated writer task so file writes never run inside the state lock;
//! a 30-second timer flushes the current state as a safety net.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::store::{TerminalState, TerminalStore};

pub const STATE_FILE: &str = "verifone-transactions.json";
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

/// Load the persisted document. A missing file starts fresh; a corrupt one
/// is logged and abandoned rather than crashing the emulator.
pub fn load(path: &Path) -> TerminalState {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(state) => {
                info!("loaded state from {}", path.display());
                state
            }
            Err(e) => {
                warn!("corrupt state file {} ({e}), starting fresh", path.display());
                TerminalState::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => TerminalState::default(),
        Err(e) => {
            warn!("cannot read {} ({e}), starting fresh", path.display());
            TerminalState::default()
        }
    }
}

/// Replace the document atomically: temp sibling then rename.
pub fn write_atomic(path: &Path, json: &str) -> Result<(), String> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| format!("write {}: {e}", tmp.display()))?;
    std::fs::rename(&tmp, path).map_err(|e| format!("rename to {}: {e}", path.display()))
}

/// Writer task: consumes snapshots and serializes all file writes. A burst
/// of mutations collapses to its newest snapshot.
pub fn spawn_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(mut snapshot) = rx.recv().await {
            while let Ok(newer) = rx.try_recv() {
                snapshot = newer;
            }
            if let Err(e) = write_atomic(&path, &snapshot) {
                error!("state flush failed: {e}");
            }
        }
    })
}

/// Periodic flush of the live state through the writer queue.
pub fn spawn_flush_timer(
    store: Arc<TerminalStore>,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        interval.tick().await; // immediate first tick
        loop {
            interval.tick().await;
            match store.snapshot_json() {
                Ok(snapshot) => {
                    if tx.send(snapshot).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("periodic flush skipped: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let state = load(&state_path(dir.path()));
        assert!(state.transactions.is_empty());
        assert!(state.batches.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(dir.path());
        std::fs::write(&path, "{definitely not json").unwrap();
        let state = load(&path);
        assert!(state.transactions.is_empty());
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(dir.path());
        write_atomic(&path, "{\"a\":1}").unwrap();
        write_atomic(&path, "{\"a\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_state_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(dir.path());

        let store = TerminalStore::new(TerminalState::default(), None);
        let json = store.snapshot_json().unwrap();
        write_atomic(&path, &json).unwrap();

        let restored = load(&path);
        assert_eq!(restored.current_batch.id, "B0001");
        assert!(restored.current_batch.is_open);
    }

    #[tokio::test]
    async fn test_writer_persists_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(dir.path());

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn_writer(path.clone(), rx);
        tx.send("{\"gen\":1}".to_string()).unwrap();
        tx.send("{\"gen\":2}".to_string()).unwrap();
        drop(tx);
        writer.await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"gen\":2}");
    }
}
