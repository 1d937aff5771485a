//! Transactions and the commit protocol.
//!
//! A transaction borrows its database. Write transactions buffer add and
//! delete operations into an oplist; nothing touches the relation index
//! until commit. Read-only transactions pin a shared index guard at
//! begin, so every query they run sees the same point-in-time state and
//! never observes a partial commit.
//!
//! Commit, under the single writer lock:
//! 1. apply the oplist to the index (all-or-nothing, undone on failure),
//! 2. record the writing sentinel if a snapshot is in flight,
//! 3. append the `BEGIN … END` bracket to the log and fsync (a refused
//!    or failed append rolls the index back),
//! 4. release the lock, then maybe trigger a background snapshot.

use crate::database::Database;
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::RawRwLock;
use relata_core::{Error, ErrorKind, Result, Value};
use relata_durability::Oplist;
use relata_storage::{execute, Condition, FetchSpec, IndexInner, ResultSet, Tuple};
use std::sync::atomic::Ordering;
use tracing::{debug, error};

/// An open transaction on a [`Database`].
///
/// Dropping an uncommitted transaction discards it (abort).
pub struct Transaction<'db> {
    db: &'db Database,
    ops: Oplist,
    /// Held for the whole lifetime of a read-only transaction.
    read_guard: Option<ArcRwLockReadGuard<RawRwLock, IndexInner>>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new_write(db: &'db Database) -> Transaction<'db> {
        Transaction {
            db,
            ops: Oplist::new(),
            read_guard: None,
        }
    }

    pub(crate) fn new_read(db: &'db Database) -> Transaction<'db> {
        Transaction {
            db,
            ops: Oplist::new(),
            read_guard: Some(db.shared().index.read_owned()),
        }
    }

    /// Check whether this transaction refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.read_guard.is_some()
    }

    fn intern(&self, ka: &str, va: Value, kb: &str, vb: Value, source: &str) -> Tuple {
        let atoms = &self.db.shared().atoms;
        Tuple {
            key_a: atoms.intern_str(ka),
            val_a: atoms.intern_value(&va),
            key_b: atoms.intern_str(kb),
            val_b: atoms.intern_value(&vb),
            source: atoms.intern_str(source),
        }
    }

    /// Enqueue an add of `(key_a, val_a, key_b, val_b, source)`.
    ///
    /// Applied at commit; adding an already-stored relationship commits
    /// as a no-op.
    pub fn add(
        &mut self,
        key_a: &str,
        val_a: impl Into<Value>,
        key_b: &str,
        val_b: impl Into<Value>,
        source: &str,
    ) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnlyTransaction);
        }
        let tuple = self.intern(key_a, val_a.into(), key_b, val_b.into(), source);
        self.ops.push_add(tuple);
        Ok(())
    }

    /// Enqueue a delete; the source must match the stored relationship.
    ///
    /// A delete that misses fails the whole commit.
    pub fn del(
        &mut self,
        key_a: &str,
        val_a: impl Into<Value>,
        key_b: &str,
        val_b: impl Into<Value>,
        source: &str,
    ) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnlyTransaction);
        }
        let tuple = self.intern(key_a, val_a.into(), key_b, val_b.into(), source);
        self.ops.push_del(tuple);
        Ok(())
    }

    /// Run a query against this transaction's view of the store.
    ///
    /// A read-only transaction queries its pinned state; a write
    /// transaction sees the committed state (its own buffered operations
    /// are not visible until commit).
    pub fn query(&self, spec: &FetchSpec, cond: &Condition) -> ResultSet {
        match &self.read_guard {
            Some(guard) => execute(guard, spec, cond),
            None => execute(&self.db.shared().index.read(), spec, cond),
        }
    }

    /// Commit the transaction.
    ///
    /// On any failure (missing delete target, log full, log I/O) the
    /// index is left exactly as it was and the error is returned; a log
    /// I/O failure additionally latches the handle read-only.
    pub fn commit(mut self) -> Result<()> {
        if self.read_guard.is_some() || self.ops.is_empty() {
            return Ok(());
        }
        let shared = self.db.shared();
        if shared.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnlyDatabase);
        }

        let mut inner = shared.index.write();
        if shared.snapshot_running.load(Ordering::Acquire) {
            // The snapshot boundary falls immediately before this END
            self.ops.mark_writing();
        }

        let applied = self.ops.apply(&mut inner)?;

        if let Some(wal) = &shared.wal {
            if let Err(e) = wal.append_commit(&shared.atoms, &self.ops) {
                applied.undo(&mut inner);
                if e.kind() == ErrorKind::Io {
                    shared.read_only.store(true, Ordering::Release);
                    error!(error = %e, "log write failed; handle is now read-only");
                }
                return Err(e);
            }
        }
        drop(inner);

        debug!(ops = self.ops.len(), "transaction committed");
        self.db.maybe_snapshot();
        Ok(())
    }

    /// Discard the transaction without applying anything.
    pub fn abort(self) {
        // Buffered operations are dropped with self
    }
}
