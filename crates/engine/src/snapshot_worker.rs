//! The per-database snapshot worker.
//!
//! One named background thread per handle drains snapshot requests off a
//! channel; at most one snapshot runs at a time (the `snapshot_running`
//! flag is set by the requester and cleared here). The state capture
//! happens under a shared index guard and is cheap; the slow file I/O
//! runs unlocked, which is exactly the window in which committing writers
//! record the writing sentinel in their oplists.

use crate::database::Shared;
use relata_core::Result;
use relata_durability::snapshot;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, SendError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

pub(crate) enum Msg {
    Snapshot,
    Shutdown,
}

pub(crate) struct SnapshotWorker {
    tx: Sender<Msg>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotWorker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> SnapshotWorker {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("relata-snapshot".to_string())
            .spawn(move || worker_loop(&shared, &rx))
            .expect("failed to spawn snapshot worker thread");
        SnapshotWorker {
            tx,
            handle: Some(handle),
        }
    }

    pub(crate) fn request(&self) -> std::result::Result<(), SendError<Msg>> {
        self.tx.send(Msg::Snapshot)
    }

    /// Stop the worker after it drains pending requests.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &Shared, rx: &mpsc::Receiver<Msg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Snapshot => {
                if let Err(e) = write_snapshot(shared) {
                    error!(error = %e, "background snapshot failed");
                }
                shared.snapshot_running.store(false, Ordering::Release);
            }
            Msg::Shutdown => break,
        }
    }
    debug!("snapshot worker stopped");
}

/// Capture, publish, and checkpoint one snapshot.
///
/// Also used synchronously by close for the final checkpoint.
pub(crate) fn write_snapshot(shared: &Shared) -> Result<()> {
    let (wal, path) = match (&shared.wal, &shared.db_path) {
        (Some(wal), Some(path)) => (wal, path),
        _ => return Ok(()),
    };
    let data = {
        let inner = shared.index.read();
        // No commit is in flight while we hold the shared guard, so the
        // frontier and the captured state agree
        snapshot::capture(&inner, &shared.atoms, wal.frontier())
    };
    snapshot::write(path, &data)?;
    wal.append_checkpoint(data.last_checkpoint)?;
    Ok(())
}
