//! Database handle, open modes, and lifecycle.
//!
//! A [`Database`] owns the interning tables, the relation index, the
//! write-ahead log, and the snapshot worker. Opening loads the snapshot,
//! replays the committed log tail, and takes the advisory lock on the log
//! file; closing writes a final checkpoint and joins the worker.
//!
//! Transactions borrow the handle, so a database cannot be closed while
//! any transaction is outstanding; the borrow checker enforces the
//! "wait for live transactions" part of the close contract.

use crate::snapshot_worker::{self, SnapshotWorker};
use crate::transaction::Transaction;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use relata_core::{Atoms, Error, Result};
use relata_durability::{snapshot, wal::Wal, DEFAULT_CAPACITY};
use relata_storage::RelationIndex;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Main database file paths open anywhere in this process.
///
/// The advisory file lock cannot distinguish a second handle in the same
/// process from one in another; this registry is what turns that case
/// into the distinct "already open" failure.
static OPEN_PATHS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Tunables of a database handle.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Ring capacity of the write-ahead log in bytes.
    pub wal_capacity: u64,
    /// Log usage (bytes past the checkpoint) that triggers a background
    /// snapshot.
    pub snapshot_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wal_capacity: DEFAULT_CAPACITY,
            snapshot_threshold: DEFAULT_CAPACITY / 2,
        }
    }
}

impl Config {
    /// A config with the given log capacity and a proportional snapshot
    /// threshold.
    pub fn with_wal_capacity(capacity: u64) -> Self {
        Config {
            wal_capacity: capacity,
            snapshot_threshold: capacity / 2,
        }
    }
}

/// State shared between the handle, its transactions, and the worker.
pub(crate) struct Shared {
    pub(crate) atoms: Arc<Atoms>,
    pub(crate) index: RelationIndex,
    pub(crate) wal: Option<Wal>,
    pub(crate) db_path: Option<PathBuf>,
    /// Latched when a log write fails mid-commit; writes are refused
    /// from then on, reads keep working.
    pub(crate) read_only: AtomicBool,
    /// True while a snapshot is being captured or written.
    pub(crate) snapshot_running: AtomicBool,
}

/// An open relata database.
pub struct Database {
    shared: Arc<Shared>,
    worker: Option<SnapshotWorker>,
    registered: Option<PathBuf>,
    config: Config,
    closed: bool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Builder configuring how a database is opened.
///
/// Without a path the database is purely in-memory: no file, no log, no
/// recovery. `create_new` refuses an existing file; `must_exist` refuses
/// a missing one; the default opens or creates.
#[derive(Default)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    config: Config,
    create_new: bool,
    must_exist: bool,
}

impl DatabaseBuilder {
    /// A builder with default settings (in-memory until a path is set).
    pub fn new() -> Self {
        DatabaseBuilder::default()
    }

    /// Set the main database file path.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override the default configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Fail with `Exists` if the database file already exists.
    pub fn create_new(mut self) -> Self {
        self.create_new = true;
        self
    }

    /// Fail with `NotFound` if the database file is absent.
    pub fn must_exist(mut self) -> Self {
        self.must_exist = true;
        self
    }

    /// Open the database.
    pub fn open(self) -> Result<Database> {
        let path = match self.path {
            Some(p) => normalize(&p),
            None => return Ok(Database::memory_with_config(self.config)),
        };

        // Claim the path in the process registry before touching files
        if !OPEN_PATHS.lock().insert(path.clone()) {
            return Err(Error::AlreadyOpen(path));
        }
        let mut registration = Registration {
            path: Some(path.clone()),
        };

        let exists = path.exists();
        if self.create_new && exists {
            return Err(Error::Exists(path));
        }
        if self.must_exist && !exists {
            return Err(Error::NotFound(path));
        }
        if !exists {
            OpenOptions::new().write(true).create(true).open(&path)?;
        }

        let wal_path = sibling_log_path(&path);
        let wal = Wal::open(&wal_path, self.config.wal_capacity)?;
        wal.try_lock_exclusive().map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                Error::InUse(path.clone())
            } else {
                Error::Io(e)
            }
        })?;

        let atoms = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms));

        let start = match snapshot::read(&path)? {
            Some(data) => {
                snapshot::load(&data, &atoms, &mut index.write())?;
                data.last_checkpoint
            }
            None => 0,
        };
        let report = wal.recover(&atoms, start, |ops| {
            ops.apply(&mut index.write()).map(|_| ())
        })?;

        let shared = Arc::new(Shared {
            atoms,
            index,
            wal: Some(wal),
            db_path: Some(path.clone()),
            read_only: AtomicBool::new(false),
            snapshot_running: AtomicBool::new(false),
        });
        let worker = SnapshotWorker::spawn(Arc::clone(&shared));

        info!(
            path = %path.display(),
            replayed = report.transactions,
            "database opened"
        );
        Ok(Database {
            shared,
            worker: Some(worker),
            registered: registration.path.take(),
            config: self.config,
            closed: false,
        })
    }
}

/// Removes a claimed path from the registry unless disarmed.
struct Registration {
    path: Option<PathBuf>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            OPEN_PATHS.lock().remove(&path);
        }
    }
}

impl Database {
    /// A builder for custom open modes and configuration.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Open or create a database at `path` with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Database> {
        Database::builder().path(path).open()
    }

    /// A purely in-memory database: no file, no log, no snapshots.
    pub fn in_memory() -> Database {
        Database::memory_with_config(Config::default())
    }

    fn memory_with_config(config: Config) -> Database {
        let atoms = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms));
        Database {
            shared: Arc::new(Shared {
                atoms,
                index,
                wal: None,
                db_path: None,
                read_only: AtomicBool::new(false),
                snapshot_running: AtomicBool::new(false),
            }),
            worker: None,
            registered: None,
            config,
            closed: false,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Begin a read-write transaction.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new_write(self)
    }

    /// Begin a read-only transaction pinned to the state at this call.
    ///
    /// The shared index lock is held until the transaction ends, so a
    /// thread must not commit a write transaction while it still holds a
    /// read transaction of its own.
    pub fn begin_read(&self) -> Transaction<'_> {
        Transaction::new_read(self)
    }

    /// Number of distinct stored relationships.
    pub fn tuple_count(&self) -> usize {
        self.shared.index.read().tuple_count()
    }

    /// Check whether a log write failure latched the handle read-only.
    pub fn is_read_only(&self) -> bool {
        self.shared.read_only.load(Ordering::Acquire)
    }

    /// Trigger a background snapshot when the log is past its threshold.
    pub(crate) fn maybe_snapshot(&self) {
        let wal = match &self.shared.wal {
            Some(w) => w,
            None => return,
        };
        let worker = match &self.worker {
            Some(w) => w,
            None => return,
        };
        if wal.used() > self.config.snapshot_threshold
            && !self
                .shared
                .snapshot_running
                .swap(true, Ordering::AcqRel)
        {
            if worker.request().is_err() {
                self.shared.snapshot_running.store(false, Ordering::Release);
            }
        }
    }

    /// Close the database: final checkpoint, worker joined, lock
    /// released.
    ///
    /// Dropping the handle does the same, logging instead of returning
    /// errors.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Join the worker first so the final checkpoint cannot race a
        // background one
        if let Some(worker) = self.worker.as_mut() {
            worker.shutdown();
        }

        let result = if self.shared.wal.is_some() && !self.is_read_only() {
            snapshot_worker::write_snapshot(&self.shared)
        } else {
            Ok(())
        };

        if let Some(path) = self.registered.take() {
            OPEN_PATHS.lock().remove(&path);
            info!(path = %path.display(), "database closed");
        }
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "error while closing database");
        }
    }
}

/// The log file lives next to the main file with `.log` appended.
fn sibling_log_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".log");
    PathBuf::from(os)
}

/// Absolute, parent-resolved form of a user-supplied path.
///
/// Canonicalizing the parent (which must exist to create the file) keeps
/// the registry key stable across spellings of the same location.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
        if let Ok(canonical) = parent.canonicalize() {
            return canonical.join(name);
        }
    }
    absolute
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_log_path() {
        assert_eq!(
            sibling_log_path(Path::new("/data/media.db")),
            PathBuf::from("/data/media.db.log")
        );
    }

    #[test]
    fn test_memory_database_has_no_files() {
        let db = Database::in_memory();
        assert_eq!(db.tuple_count(), 0);
        assert!(!db.is_read_only());
        db.close().unwrap();
    }

    #[test]
    fn test_config_threshold_tracks_capacity() {
        let config = Config::with_wal_capacity(1 << 16);
        assert_eq!(config.snapshot_threshold, 1 << 15);
        let default = Config::default();
        assert_eq!(default.wal_capacity, DEFAULT_CAPACITY);
    }
}
