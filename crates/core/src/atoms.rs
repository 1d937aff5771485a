//! Interning tables for strings and integers.
//!
//! Every key, source, and value that enters the engine goes through
//! [`Atoms`] first. Interning is idempotent and returns a stable id for the
//! lifetime of the database handle; comparing two ids of the same table
//! suffices for equality. Strings are stored once as `Arc<str>`, so reverse
//! lookup hands out a cheap clone instead of borrowing across the table
//! lock.
//!
//! Integers are interned through an analogous table so that index keys and
//! equality checks are uniform across both value shapes.
//!
//! Log replay and snapshot load feed their strings through the same tables
//! before anything reaches the relation index.

use crate::value::{Value, ValueId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// Stable id of an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrId(pub u32);

/// Stable id of an interned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntId(pub u32);

#[derive(Default)]
struct StrTable {
    by_val: FxHashMap<Arc<str>, StrId>,
    by_id: Vec<Arc<str>>,
}

#[derive(Default)]
struct IntTable {
    by_val: FxHashMap<i32, IntId>,
    by_id: Vec<i32>,
}

/// The per-handle interning tables.
///
/// Each table has its own mutex; lock scopes are confined to single
/// lookups so the tables never participate in lock-order cycles with the
/// index or the log.
#[derive(Default)]
pub struct Atoms {
    strings: Mutex<StrTable>,
    ints: Mutex<IntTable>,
}

impl Atoms {
    /// Create empty tables.
    pub fn new() -> Self {
        Atoms::default()
    }

    /// Intern a string, returning its stable id.
    pub fn intern_str(&self, s: &str) -> StrId {
        let mut table = self.strings.lock();
        if let Some(&id) = table.by_val.get(s) {
            return id;
        }
        let id = StrId(table.by_id.len() as u32);
        let stored: Arc<str> = Arc::from(s);
        table.by_id.push(Arc::clone(&stored));
        table.by_val.insert(stored, id);
        id
    }

    /// Look up a string id without interning.
    ///
    /// Queries use this: a key that was never interned cannot appear in
    /// the index, so the lookup miss doubles as an empty result.
    pub fn lookup_str(&self, s: &str) -> Option<StrId> {
        self.strings.lock().by_val.get(s).copied()
    }

    /// Intern an integer, returning its stable id.
    pub fn intern_int(&self, v: i32) -> IntId {
        let mut table = self.ints.lock();
        if let Some(&id) = table.by_val.get(&v) {
            return id;
        }
        let id = IntId(table.by_id.len() as u32);
        table.by_id.push(v);
        table.by_val.insert(v, id);
        id
    }

    /// Resolve a string id back to its bytes.
    ///
    /// Panics on an id that was never produced by this table; ids never
    /// cross database handles.
    pub fn resolve_str(&self, id: StrId) -> Arc<str> {
        Arc::clone(&self.strings.lock().by_id[id.0 as usize])
    }

    /// Resolve an integer id back to its value.
    pub fn resolve_int(&self, id: IntId) -> i32 {
        self.ints.lock().by_id[id.0 as usize]
    }

    /// Intern a caller-supplied value.
    pub fn intern_value(&self, v: &Value) -> ValueId {
        match v {
            Value::Int(i) => ValueId::Int(self.intern_int(*i)),
            Value::Str(s) => ValueId::Str(self.intern_str(s)),
        }
    }

    /// Look up a value id without interning.
    pub fn lookup_value(&self, v: &Value) -> Option<ValueId> {
        match v {
            Value::Int(i) => self
                .ints
                .lock()
                .by_val
                .get(i)
                .copied()
                .map(ValueId::Int),
            Value::Str(s) => self.lookup_str(s).map(ValueId::Str),
        }
    }

    /// Resolve an interned value back to its caller-visible form.
    pub fn resolve_value(&self, v: ValueId) -> Value {
        match v {
            ValueId::Int(id) => Value::Int(self.resolve_int(id)),
            ValueId::Str(id) => Value::Str(self.resolve_str(id).to_string()),
        }
    }

    /// Total order over interned values (ints numerically, strings
    /// bytewise, ints before strings).
    pub fn cmp_values(&self, a: ValueId, b: ValueId) -> Ordering {
        match (a, b) {
            (ValueId::Int(x), ValueId::Int(y)) => {
                if x == y {
                    Ordering::Equal
                } else {
                    self.resolve_int(x).cmp(&self.resolve_int(y))
                }
            }
            (ValueId::Str(x), ValueId::Str(y)) => {
                if x == y {
                    Ordering::Equal
                } else {
                    self.resolve_str(x).as_bytes().cmp(self.resolve_str(y).as_bytes())
                }
            }
            (ValueId::Int(_), ValueId::Str(_)) => Ordering::Less,
            (ValueId::Str(_), ValueId::Int(_)) => Ordering::Greater,
        }
    }

    /// Compare an interned value against a caller-supplied operand.
    ///
    /// `caseless` applies the ASCII-uppercased comparison to string pairs.
    pub fn cmp_id_to_value(&self, a: ValueId, b: &Value, caseless: bool) -> Ordering {
        let resolved = self.resolve_value(a);
        if caseless {
            resolved.compare_caseless(b)
        } else {
            resolved.compare(b)
        }
    }

    /// Number of interned strings.
    pub fn str_count(&self) -> usize {
        self.strings.lock().by_id.len()
    }

    /// Number of interned integers.
    pub fn int_count(&self) -> usize {
        self.ints.lock().by_id.len()
    }

    /// Dump the string table in id order (for snapshots).
    pub fn dump_strings(&self) -> Vec<String> {
        self.strings
            .lock()
            .by_id
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Dump the integer table in id order (for snapshots).
    pub fn dump_ints(&self) -> Vec<i32> {
        self.ints.lock().by_id.clone()
    }
}
