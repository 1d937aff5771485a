//! The relation index: the primary in-memory store.
//!
//! Every stored fact is a symmetric 5-tuple `(key_a, val_a, key_b, val_b,
//! source)`. The index keeps one bucket per `(key, value)` pair; a bucket
//! lists the "right sides" reachable from that pair. Inserting an edge
//! mutates two buckets so both directions stay queryable (the inverse
//! invariant); removal is symmetric.
//!
//! Each key also carries an ordered auxiliary index over its values,
//! sorted by the engine-wide value order. Binary search over it answers
//! equality, range, and monotone-predicate queries; filters whose matches
//! are not contiguous in sort order (globs, tokens, caseless equality)
//! scan it linearly.

use crate::arena::{Arena, ArenaId};
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use relata_core::{Atoms, Error, Result, StrId, ValueId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::sync::Arc;

/// Stable opaque handle to a `(key, value)` bucket.
pub type BucketId = ArenaId;

/// A fully interned relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tuple {
    /// First key
    pub key_a: StrId,
    /// Value under the first key
    pub val_a: ValueId,
    /// Second key
    pub key_b: StrId,
    /// Value under the second key
    pub val_b: ValueId,
    /// Asserting source
    pub source: StrId,
}

impl Tuple {
    /// The inverse direction of this relationship.
    pub fn inverse(&self) -> Tuple {
        Tuple {
            key_a: self.key_b,
            val_a: self.val_b,
            key_b: self.key_a,
            val_b: self.val_a,
            source: self.source,
        }
    }
}

/// One reachable side of a relationship, stored inside a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RightSide {
    /// Key on the other side
    pub key: StrId,
    /// Value on the other side
    pub value: ValueId,
    /// Source that asserted the relationship
    pub source: StrId,
}

/// A `(key, value)` pair and everything reachable from it.
#[derive(Debug)]
pub struct Bucket {
    /// The anchor key
    pub key: StrId,
    /// The anchor value
    pub value: ValueId,
    /// Right sides in insertion order
    pub rights: SmallVec<[RightSide; 4]>,
}

/// Slot of the per-key ordered auxiliary index.
#[derive(Debug, Clone, Copy)]
pub struct OrderedSlot {
    /// The value this slot indexes
    pub value: ValueId,
    /// Bucket holding that value's right sides
    pub bucket: BucketId,
}

/// Per-key state: value lookup map plus the ordered auxiliary index.
#[derive(Default)]
pub struct KeyEntry {
    by_value: FxHashMap<ValueId, BucketId>,
    ordered: Vec<OrderedSlot>,
}

impl KeyEntry {
    /// The ordered slots for this key, sorted by value.
    pub fn slots(&self) -> &[OrderedSlot] {
        &self.ordered
    }
}

/// The index state proper; always accessed through the outer lock.
pub struct IndexInner {
    atoms: Arc<Atoms>,
    keys: FxHashMap<StrId, KeyEntry>,
    buckets: Arena<Bucket>,
}

impl IndexInner {
    fn new(atoms: Arc<Atoms>) -> Self {
        IndexInner {
            atoms,
            keys: FxHashMap::default(),
            buckets: Arena::new(),
        }
    }

    /// The interning tables this index resolves through.
    pub fn atoms(&self) -> &Arc<Atoms> {
        &self.atoms
    }

    /// Look up the bucket for a `(key, value)` pair.
    pub fn lookup_bucket(&self, key: StrId, value: ValueId) -> Option<BucketId> {
        self.keys.get(&key)?.by_value.get(&value).copied()
    }

    /// Resolve a bucket handle.
    pub fn bucket(&self, id: BucketId) -> Option<&Bucket> {
        self.buckets.get(id)
    }

    /// Per-key entry, if the key holds any values.
    pub fn key_entry(&self, key: StrId) -> Option<&KeyEntry> {
        self.keys.get(&key)
    }

    /// Iterate every live bucket in insertion order.
    pub fn all_buckets(&self) -> impl Iterator<Item = (BucketId, &Bucket)> {
        self.buckets.iter()
    }

    /// Number of keys that currently hold values.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Check for a stored relationship (either direction works).
    pub fn contains(&self, t: &Tuple) -> bool {
        self.lookup_bucket(t.key_a, t.val_a)
            .and_then(|id| self.buckets.get(id))
            .map(|b| {
                b.rights.contains(&RightSide {
                    key: t.key_b,
                    value: t.val_b,
                    source: t.source,
                })
            })
            .unwrap_or(false)
    }

    /// Insert a relationship, mutating both directions.
    ///
    /// Returns `false` when the identical 5-tuple is already stored
    /// (idempotent no-op).
    pub fn insert_edge(&mut self, t: &Tuple) -> bool {
        if self.contains(t) {
            return false;
        }
        self.half_insert(t.key_a, t.val_a, t.key_b, t.val_b, t.source);
        // Self-referential pairs store a single half
        if (t.key_a, t.val_a) != (t.key_b, t.val_b) {
            self.half_insert(t.key_b, t.val_b, t.key_a, t.val_a, t.source);
        }
        true
    }

    /// Remove a relationship; the source must match exactly.
    pub fn remove_edge(&mut self, t: &Tuple) -> Result<()> {
        if !self.contains(t) {
            return Err(self.missing_tuple(t));
        }
        self.half_remove(t.key_a, t.val_a, t.key_b, t.val_b, t.source);
        if (t.key_a, t.val_a) != (t.key_b, t.val_b) {
            self.half_remove(t.key_b, t.val_b, t.key_a, t.val_a, t.source);
        }
        Ok(())
    }

    fn half_insert(&mut self, key: StrId, value: ValueId, okey: StrId, oval: ValueId, src: StrId) {
        let bucket_id = match self.keys.get(&key).and_then(|e| e.by_value.get(&value)) {
            Some(&id) => id,
            None => {
                let id = self.buckets.insert(Bucket {
                    key,
                    value,
                    rights: SmallVec::new(),
                });
                let atoms = Arc::clone(&self.atoms);
                let entry = self.keys.entry(key).or_default();
                entry.by_value.insert(value, id);
                let pos = entry
                    .ordered
                    .binary_search_by(|slot| atoms.cmp_values(slot.value, value))
                    .unwrap_err();
                entry.ordered.insert(pos, OrderedSlot { value, bucket: id });
                id
            }
        };
        let bucket = self.buckets.get_mut(bucket_id).expect("live bucket");
        let right = RightSide {
            key: okey,
            value: oval,
            source: src,
        };
        if !bucket.rights.contains(&right) {
            bucket.rights.push(right);
        }
    }

    fn half_remove(&mut self, key: StrId, value: ValueId, okey: StrId, oval: ValueId, src: StrId) {
        let bucket_id = self.keys[&key].by_value[&value];
        let bucket = self.buckets.get_mut(bucket_id).expect("live bucket");
        let right = RightSide {
            key: okey,
            value: oval,
            source: src,
        };
        if let Some(pos) = bucket.rights.iter().position(|r| *r == right) {
            bucket.rights.remove(pos);
        }
        if bucket.rights.is_empty() {
            self.buckets.remove(bucket_id);
            let atoms = Arc::clone(&self.atoms);
            let entry = self.keys.get_mut(&key).expect("live key");
            entry.by_value.remove(&value);
            if let Ok(pos) = entry
                .ordered
                .binary_search_by(|slot| atoms.cmp_values(slot.value, value))
            {
                entry.ordered.remove(pos);
            }
            if entry.by_value.is_empty() {
                self.keys.remove(&key);
            }
        }
    }

    fn missing_tuple(&self, t: &Tuple) -> Error {
        Error::MissingTuple {
            key_a: self.atoms.resolve_str(t.key_a).to_string(),
            val_a: self.atoms.resolve_value(t.val_a).to_string(),
            key_b: self.atoms.resolve_str(t.key_b).to_string(),
            val_b: self.atoms.resolve_value(t.val_b).to_string(),
            rel_source: self.atoms.resolve_str(t.source).to_string(),
        }
    }

    /// Contiguous `[lo, hi)` range of a key's ordered slots for which a
    /// monotone probe reports `Equal`.
    ///
    /// The probe must be non-decreasing over the slot order (`Less` slots,
    /// then `Equal`, then `Greater`); equality and range filters satisfy
    /// this by construction, and caller-supplied predicates promise it.
    pub fn probe_range(&self, key: StrId, probe: impl Fn(ValueId) -> Ordering) -> (usize, usize) {
        match self.keys.get(&key) {
            None => (0, 0),
            Some(entry) => {
                let lo = entry
                    .ordered
                    .partition_point(|slot| probe(slot.value) == Ordering::Less);
                let hi = entry
                    .ordered
                    .partition_point(|slot| probe(slot.value) != Ordering::Greater);
                (lo, hi.max(lo))
            }
        }
    }

    /// Every stored relationship exactly once, in canonical direction.
    ///
    /// The smaller `(key, value)` side (by key string, then value order)
    /// is reported as the `a` side, so the symmetric pair collapses to a
    /// single tuple. Used by snapshots and verification.
    pub fn canonical_edges(&self) -> Vec<Tuple> {
        let mut edges = Vec::new();
        for (_, bucket) in self.buckets.iter() {
            for right in &bucket.rights {
                let side_cmp = self
                    .atoms
                    .resolve_str(bucket.key)
                    .as_bytes()
                    .cmp(self.atoms.resolve_str(right.key).as_bytes())
                    .then_with(|| self.atoms.cmp_values(bucket.value, right.value));
                if side_cmp != Ordering::Greater {
                    edges.push(Tuple {
                        key_a: bucket.key,
                        val_a: bucket.value,
                        key_b: right.key,
                        val_b: right.value,
                        source: right.source,
                    });
                }
            }
        }
        edges
    }

    /// Number of distinct stored relationships.
    pub fn tuple_count(&self) -> usize {
        self.canonical_edges().len()
    }
}

/// The reader-writer-guarded relation index.
///
/// Commits take the write lock for the whole apply-and-log sequence;
/// read-only transactions pin a shared guard for their lifetime so they
/// observe a consistent view.
pub struct RelationIndex {
    atoms: Arc<Atoms>,
    inner: Arc<RwLock<IndexInner>>,
}

impl RelationIndex {
    /// Create an empty index resolving through the given tables.
    pub fn new(atoms: Arc<Atoms>) -> Self {
        let inner = Arc::new(RwLock::new(IndexInner::new(Arc::clone(&atoms))));
        RelationIndex { atoms, inner }
    }

    /// The interning tables.
    pub fn atoms(&self) -> &Arc<Atoms> {
        &self.atoms
    }

    /// Take the shared lock for the duration of the guard.
    pub fn read(&self) -> RwLockReadGuard<'_, IndexInner> {
        self.inner.read()
    }

    /// Take a shared lock that owns its reference (held across a
    /// transaction's lifetime).
    pub fn read_owned(&self) -> ArcRwLockReadGuard<RawRwLock, IndexInner> {
        RwLock::read_arc(&self.inner)
    }

    /// Take the exclusive writer lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, IndexInner> {
        self.inner.write()
    }
}
