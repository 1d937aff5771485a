//! Oplists: the replayable operation log of one transaction.
//!
//! The same type drives three paths: commit-time application to the
//! relation index, encoding into the write-ahead log, and recovery-time
//! replay out of it. An oplist is just tagged operations in order plus an
//! `apply` that either lands completely or undoes itself.

use relata_core::Result;
use relata_storage::{IndexInner, Tuple};

/// One operation of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Insert a relationship
    Add(Tuple),
    /// Remove a relationship (source must match)
    Del(Tuple),
    /// Sentinel: a snapshot write began during this transaction
    Writing,
}

/// Effect an applied operation actually had, kept for rollback.
#[derive(Debug, Clone, Copy)]
enum Effect {
    /// Add inserted a new edge (duplicates record `None`)
    Inserted(Tuple),
    /// Del removed an existing edge
    Removed(Tuple),
    /// No index change (duplicate add, writing sentinel)
    None,
}

/// Record of a successful [`Oplist::apply`], undoable in reverse order.
#[derive(Debug)]
pub struct Applied {
    effects: Vec<Effect>,
}

impl Applied {
    /// Reverse every index mutation this application performed.
    pub fn undo(self, index: &mut IndexInner) {
        undo_effects(&self.effects, index);
    }
}

fn undo_effects(effects: &[Effect], index: &mut IndexInner) {
    for effect in effects.iter().rev() {
        match effect {
            Effect::Inserted(t) => {
                // Present by construction; a miss would mean the lock was
                // not held across apply and undo
                let _ = index.remove_edge(t);
            }
            Effect::Removed(t) => {
                index.insert_edge(t);
            }
            Effect::None => {}
        }
    }
}

/// Ordered operations of one transaction.
#[derive(Debug, Default)]
pub struct Oplist {
    ops: Vec<Op>,
}

impl Oplist {
    /// An empty oplist.
    pub fn new() -> Self {
        Oplist::default()
    }

    /// Enqueue an add.
    pub fn push_add(&mut self, tuple: Tuple) {
        self.ops.push(Op::Add(tuple));
    }

    /// Enqueue a delete.
    pub fn push_del(&mut self, tuple: Tuple) {
        self.ops.push(Op::Del(tuple));
    }

    /// Append the snapshot-boundary sentinel.
    pub fn mark_writing(&mut self) {
        self.ops.push(Op::Writing);
    }

    /// Check whether the sentinel is present.
    pub fn has_writing(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, Op::Writing))
    }

    /// Number of enqueued operations (sentinel included).
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check for an empty oplist.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterate operations in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Op> {
        self.ops.iter()
    }

    /// Apply every operation to the index, in order.
    ///
    /// All-or-nothing: if any delete misses its tuple, the mutations
    /// already performed are undone in reverse order and the error is
    /// returned. On success the returned [`Applied`] can roll the whole
    /// application back (commit uses this when the log append fails).
    pub fn apply(&self, index: &mut IndexInner) -> Result<Applied> {
        let mut effects = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            match op {
                Op::Add(t) => {
                    let inserted = index.insert_edge(t);
                    effects.push(if inserted {
                        Effect::Inserted(*t)
                    } else {
                        Effect::None
                    });
                }
                Op::Del(t) => match index.remove_edge(t) {
                    Ok(()) => effects.push(Effect::Removed(*t)),
                    Err(e) => {
                        undo_effects(&effects, index);
                        return Err(e);
                    }
                },
                Op::Writing => effects.push(Effect::None),
            }
        }
        Ok(Applied { effects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relata_core::{Atoms, Value};
    use relata_storage::RelationIndex;
    use std::sync::Arc;

    fn tuple(atoms: &Atoms, ka: &str, va: &str, kb: &str, vb: &str, src: &str) -> Tuple {
        Tuple {
            key_a: atoms.intern_str(ka),
            val_a: atoms.intern_value(&Value::from(va)),
            key_b: atoms.intern_str(kb),
            val_b: atoms.intern_value(&Value::from(vb)),
            source: atoms.intern_str(src),
        }
    }

    #[test]
    fn test_apply_in_order() {
        let atoms = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms));
        let t1 = tuple(&atoms, "entry", "a", "property", "b", "s");
        let t2 = tuple(&atoms, "entry", "a", "property", "c", "s");

        let mut ops = Oplist::new();
        ops.push_add(t1);
        ops.push_add(t2);
        ops.push_del(t1);

        let mut inner = index.write();
        ops.apply(&mut inner).unwrap();
        assert!(!inner.contains(&t1));
        assert!(inner.contains(&t2));
    }

    #[test]
    fn test_failed_apply_rolls_back() {
        let atoms = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms));
        let t1 = tuple(&atoms, "entry", "a", "property", "b", "s");
        let missing = tuple(&atoms, "entry", "x", "property", "y", "s");

        let mut ops = Oplist::new();
        ops.push_add(t1);
        ops.push_del(missing);

        let mut inner = index.write();
        assert!(ops.apply(&mut inner).is_err());
        // The add that preceded the failing del is gone again
        assert!(!inner.contains(&t1));
        assert_eq!(inner.tuple_count(), 0);
    }

    #[test]
    fn test_undo_skips_duplicate_adds() {
        let atoms = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms));
        let t1 = tuple(&atoms, "entry", "a", "property", "b", "s");

        {
            let mut inner = index.write();
            inner.insert_edge(&t1);
        }

        // Duplicate add applies as a no-op; undoing it must not delete
        // the pre-existing edge
        let mut ops = Oplist::new();
        ops.push_add(t1);
        let mut inner = index.write();
        let applied = ops.apply(&mut inner).unwrap();
        applied.undo(&mut inner);
        assert!(inner.contains(&t1));
    }

    #[test]
    fn test_undo_restores_deletes() {
        let atoms = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms));
        let t1 = tuple(&atoms, "entry", "a", "property", "b", "s");

        {
            let mut inner = index.write();
            inner.insert_edge(&t1);
        }

        let mut ops = Oplist::new();
        ops.push_del(t1);
        let mut inner = index.write();
        let applied = ops.apply(&mut inner).unwrap();
        assert!(!inner.contains(&t1));
        applied.undo(&mut inner);
        assert!(inner.contains(&t1));
    }

    #[test]
    fn test_writing_sentinel() {
        let mut ops = Oplist::new();
        assert!(!ops.has_writing());
        ops.mark_writing();
        assert!(ops.has_writing());
        assert_eq!(ops.len(), 1);

        let atoms = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms));
        let mut inner = index.write();
        // The sentinel is not an index mutation
        ops.apply(&mut inner).unwrap();
        assert_eq!(inner.tuple_count(), 0);
    }
}
