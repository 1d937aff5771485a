//! Fetch specifications, filter conditions, and query evaluation.
//!
//! A query pairs a [`FetchSpec`] (what to project from each matching
//! entry) with a [`Condition`] (which entries match). Evaluation drives
//! off the ordered per-key index: equality, range, and custom monotone
//! filters binary-search it; glob, token, and caseless filters scan it.
//! Every candidate entry is then verified against the full condition tree
//! before it becomes a row.

use crate::index::{Bucket, BucketId, IndexInner};
use crate::resultset::{Cell, ResultRecord, ResultSet};
use crate::sourcepref::SourcePref;
use relata_core::{Atoms, Pattern, Value, ValueId};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Fetch flag: populate key and source on each record, not just the value.
pub const FETCH_DATA: u32 = 1 << 0;

/// One column request of a fetch specification.
#[derive(Clone)]
pub struct FetchRequest {
    key: Option<String>,
    pref: Option<Arc<SourcePref>>,
    flags: u32,
}

/// Ordered list of column requests applied to every matching entry.
#[derive(Clone, Default)]
pub struct FetchSpec {
    requests: Vec<FetchRequest>,
}

impl FetchSpec {
    /// An empty specification.
    pub fn new() -> Self {
        FetchSpec::default()
    }

    /// Add a column for one key.
    pub fn add(mut self, key: &str, pref: Option<Arc<SourcePref>>, flags: u32) -> Self {
        self.requests.push(FetchRequest {
            key: Some(key.to_string()),
            pref,
            flags,
        });
        self
    }

    /// Add a wildcard column projecting every key under the entry.
    pub fn add_all(mut self, pref: Option<Arc<SourcePref>>, flags: u32) -> Self {
        self.requests.push(FetchRequest {
            key: None,
            pref,
            flags,
        });
        self
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check for an empty specification.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Caller-supplied monotone probe for custom filters.
///
/// Must report where the probed value stands relative to the (implicit)
/// match target: `Less` for values sorting before every match, `Equal`
/// for matches, `Greater` after. Monotonicity over the value order is the
/// caller's contract; it is what lets the evaluator binary-search.
pub type CustomProbe = Arc<dyn Fn(&Value) -> Ordering + Send + Sync>;

/// Comparison mode of a filter.
#[derive(Clone)]
pub enum FilterMode {
    /// Value equals the operand
    Equal(Value),
    /// Value sorts strictly before the operand
    Smaller(Value),
    /// Value sorts strictly after the operand
    Greater(Value),
    /// String value matches a glob pattern
    Match(Pattern),
    /// String value contains the operand as a whitespace token
    Token(String),
    /// Caller-supplied monotone probe
    Custom(CustomProbe),
}

impl fmt::Debug for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Equal(v) => write!(f, "Equal({:?})", v),
            FilterMode::Smaller(v) => write!(f, "Smaller({:?})", v),
            FilterMode::Greater(v) => write!(f, "Greater({:?})", v),
            FilterMode::Match(p) => write!(f, "Match({:?})", p.as_str()),
            FilterMode::Token(t) => write!(f, "Token({:?})", t),
            FilterMode::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A leaf condition: one comparison bound to one key.
///
/// By default a filter tests an entry's attributes: it matches when some
/// right side under the filter's key satisfies the comparison. With the
/// parent modifier it tests the entry pair itself instead.
#[derive(Debug, Clone)]
pub struct Filter {
    key: String,
    mode: FilterMode,
    pref: Option<Arc<SourcePref>>,
    caseless: bool,
    parent: bool,
}

impl Filter {
    fn new(key: &str, mode: FilterMode) -> Self {
        Filter {
            key: key.to_string(),
            mode,
            pref: None,
            caseless: false,
            parent: false,
        }
    }

    /// Match values equal to the operand.
    pub fn equal(key: &str, value: impl Into<Value>) -> Self {
        Filter::new(key, FilterMode::Equal(value.into()))
    }

    /// Match values sorting strictly before the operand.
    pub fn smaller(key: &str, value: impl Into<Value>) -> Self {
        Filter::new(key, FilterMode::Smaller(value.into()))
    }

    /// Match values sorting strictly after the operand.
    pub fn greater(key: &str, value: impl Into<Value>) -> Self {
        Filter::new(key, FilterMode::Greater(value.into()))
    }

    /// Match string values against a glob pattern.
    pub fn matches(key: &str, pattern: &str) -> Self {
        Filter::new(key, FilterMode::Match(Pattern::new(pattern)))
    }

    /// Match string values containing the operand as a whitespace token.
    pub fn token(key: &str, token: &str) -> Self {
        Filter::new(key, FilterMode::Token(token.to_string()))
    }

    /// Match through a caller-supplied monotone probe.
    pub fn custom(key: &str, probe: impl Fn(&Value) -> Ordering + Send + Sync + 'static) -> Self {
        Filter::new(key, FilterMode::Custom(Arc::new(probe)))
    }

    /// Compare strings by ASCII-uppercased bytes.
    pub fn caseless(mut self) -> Self {
        self.caseless = true;
        self
    }

    /// Evaluate against the entry pair itself rather than its attributes.
    pub fn on_parent(mut self) -> Self {
        self.parent = true;
        self
    }

    /// Restrict attribute evaluation to the preferred source per entry.
    pub fn with_sources(mut self, pref: Arc<SourcePref>) -> Self {
        self.pref = Some(pref);
        self
    }
}

/// A condition tree of filters and combinators.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Leaf comparison
    Filter(Filter),
    /// Every subcondition must match
    And(Vec<Condition>),
    /// At least one subcondition must match
    Or(Vec<Condition>),
    /// The subcondition must not match
    Not(Box<Condition>),
}

impl Condition {
    /// Conjunction of subconditions.
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And(conditions)
    }

    /// Disjunction of subconditions.
    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or(conditions)
    }

    /// Negation of a subcondition.
    pub fn not(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }
}

impl From<Filter> for Condition {
    fn from(f: Filter) -> Self {
        Condition::Filter(f)
    }
}

/// Evaluate a query against an index view.
///
/// Rows appear in first-encountered order of the candidate scan; cells
/// are sorted by the column's source preference.
pub fn execute(inner: &IndexInner, spec: &FetchSpec, cond: &Condition) -> ResultSet {
    let candidates = match collect_candidates(inner, cond) {
        Some(c) => c,
        // Nothing to drive from (e.g. a pure negation): scan everything
        None => inner.all_buckets().map(|(id, _)| id).collect(),
    };

    let mut seen: FxHashSet<BucketId> = FxHashSet::default();
    let mut result = ResultSet::new(spec.len());
    for id in candidates {
        if !seen.insert(id) {
            continue;
        }
        let bucket = match inner.bucket(id) {
            Some(b) => b,
            None => continue,
        };
        if cond_matches(inner, cond, bucket) {
            let row = spec
                .requests
                .iter()
                .map(|req| build_cell(inner, bucket, req))
                .collect();
            result.push_row(row);
        }
    }
    result
}

/// Candidate buckets for a condition, or `None` when the condition cannot
/// narrow the scan.
fn collect_candidates(inner: &IndexInner, cond: &Condition) -> Option<Vec<BucketId>> {
    match cond {
        Condition::Filter(f) => Some(filter_candidates(inner, f)),
        // Any one conjunct bounds the row set; verification filters the rest
        Condition::And(cs) => cs.iter().find_map(|c| collect_candidates(inner, c)),
        Condition::Or(cs) => {
            let mut out = Vec::new();
            for c in cs {
                out.extend(collect_candidates(inner, c)?);
            }
            Some(out)
        }
        Condition::Not(_) => None,
    }
}

fn filter_candidates(inner: &IndexInner, f: &Filter) -> Vec<BucketId> {
    let atoms = inner.atoms();
    let key = match atoms.lookup_str(&f.key) {
        Some(k) => k,
        None => return Vec::new(),
    };
    let entry = match inner.key_entry(key) {
        Some(e) => e,
        None => return Vec::new(),
    };
    let slots = entry.slots();

    let matched: Vec<BucketId> = match contiguous_probe(atoms, f) {
        Some(ProbeShape::Range(probe)) => {
            let (lo, hi) = inner.probe_range(key, probe);
            slots[lo..hi].iter().map(|s| s.bucket).collect()
        }
        Some(ProbeShape::Prefix(probe)) => {
            let (lo, _) = inner.probe_range(key, probe);
            slots[..lo].iter().map(|s| s.bucket).collect()
        }
        Some(ProbeShape::Suffix(probe)) => {
            let (_, hi) = inner.probe_range(key, probe);
            slots[hi..].iter().map(|s| s.bucket).collect()
        }
        // Matches are not contiguous in sort order: scan the key's index
        None => slots
            .iter()
            .filter(|s| value_matches(atoms, f, s.value))
            .map(|s| s.bucket)
            .collect(),
    };

    if f.parent {
        matched
    } else {
        // A bucket matched under the filter key; by symmetry each of its
        // right sides is an entry carrying that attribute.
        let mut out = Vec::new();
        for id in matched {
            if let Some(bucket) = inner.bucket(id) {
                for right in &bucket.rights {
                    if let Some(entry_id) = inner.lookup_bucket(right.key, right.value) {
                        out.push(entry_id);
                    }
                }
            }
        }
        out
    }
}

enum ProbeShape<'a> {
    Range(Box<dyn Fn(ValueId) -> Ordering + 'a>),
    Prefix(Box<dyn Fn(ValueId) -> Ordering + 'a>),
    Suffix(Box<dyn Fn(ValueId) -> Ordering + 'a>),
}

/// Binary-searchable shape of a filter, when its matches form a
/// contiguous range of the (case-sensitively sorted) ordered index.
fn contiguous_probe<'a>(atoms: &'a Atoms, f: &'a Filter) -> Option<ProbeShape<'a>> {
    // Caseless string comparison does not agree with the index order
    let caseless_str = |v: &Value| f.caseless && matches!(v, Value::Str(_));
    match &f.mode {
        FilterMode::Equal(op) if !caseless_str(op) => Some(ProbeShape::Range(Box::new(
            move |v| atoms.cmp_id_to_value(v, op, false),
        ))),
        FilterMode::Smaller(op) if !caseless_str(op) => Some(ProbeShape::Prefix(Box::new(
            move |v| atoms.cmp_id_to_value(v, op, false),
        ))),
        FilterMode::Greater(op) if !caseless_str(op) => Some(ProbeShape::Suffix(Box::new(
            move |v| atoms.cmp_id_to_value(v, op, false),
        ))),
        FilterMode::Custom(probe) => {
            let probe = Arc::clone(probe);
            Some(ProbeShape::Range(Box::new(move |v| {
                probe(&atoms.resolve_value(v))
            })))
        }
        _ => None,
    }
}

fn value_matches(atoms: &Atoms, f: &Filter, v: ValueId) -> bool {
    match &f.mode {
        FilterMode::Equal(op) => atoms.cmp_id_to_value(v, op, f.caseless) == Ordering::Equal,
        FilterMode::Smaller(op) => atoms.cmp_id_to_value(v, op, f.caseless) == Ordering::Less,
        FilterMode::Greater(op) => atoms.cmp_id_to_value(v, op, f.caseless) == Ordering::Greater,
        FilterMode::Match(pattern) => match atoms.resolve_value(v) {
            Value::Str(s) => {
                if f.caseless {
                    pattern.matches_caseless(&s)
                } else {
                    pattern.matches(&s)
                }
            }
            Value::Int(_) => false,
        },
        FilterMode::Token(token) => match atoms.resolve_value(v) {
            Value::Str(s) => s.split_whitespace().any(|t| {
                if f.caseless {
                    t.eq_ignore_ascii_case(token)
                } else {
                    t == token
                }
            }),
            Value::Int(_) => false,
        },
        FilterMode::Custom(probe) => probe(&atoms.resolve_value(v)) == Ordering::Equal,
    }
}

fn cond_matches(inner: &IndexInner, cond: &Condition, bucket: &Bucket) -> bool {
    match cond {
        Condition::Filter(f) => filter_matches(inner, f, bucket),
        Condition::And(cs) => cs.iter().all(|c| cond_matches(inner, c, bucket)),
        Condition::Or(cs) => cs.iter().any(|c| cond_matches(inner, c, bucket)),
        Condition::Not(c) => !cond_matches(inner, c, bucket),
    }
}

fn filter_matches(inner: &IndexInner, f: &Filter, bucket: &Bucket) -> bool {
    let atoms = inner.atoms();
    let key = match atoms.lookup_str(&f.key) {
        Some(k) => k,
        None => return false,
    };
    if f.parent {
        return bucket.key == key && value_matches(atoms, f, bucket.value);
    }
    if let Some(pref) = &f.pref {
        // Test only the preferred right side; ties keep the first seen
        let mut best: Option<(u32, ValueId)> = None;
        for right in bucket.rights.iter().filter(|r| r.key == key) {
            let priority = pref.priority(atoms, right.source);
            if best.map_or(true, |(b, _)| priority < b) {
                best = Some((priority, right.value));
            }
        }
        best.map_or(false, |(_, value)| value_matches(atoms, f, value))
    } else {
        bucket
            .rights
            .iter()
            .any(|r| r.key == key && value_matches(atoms, f, r.value))
    }
}

fn build_cell(inner: &IndexInner, bucket: &Bucket, req: &FetchRequest) -> Cell {
    let atoms = inner.atoms();
    let with_data = req.flags & FETCH_DATA != 0;
    let mut records: Vec<(u32, ResultRecord)> = Vec::new();

    let priority_of = |source| {
        req.pref
            .as_ref()
            .map(|p| p.priority(atoms, source))
            .unwrap_or(0)
    };

    match &req.key {
        None => {
            // Wildcard: one record per attribute of the entry
            for right in &bucket.rights {
                records.push((
                    priority_of(right.source),
                    ResultRecord {
                        key: with_data.then(|| atoms.resolve_str(right.key)),
                        source: with_data.then(|| atoms.resolve_str(right.source)),
                        value: atoms.resolve_value(right.value),
                    },
                ));
            }
        }
        Some(k) => {
            if let Some(key) = atoms.lookup_str(k) {
                if bucket.key == key {
                    // The anchor pair itself, reported without a source
                    records.push((
                        0,
                        ResultRecord {
                            key: with_data.then(|| atoms.resolve_str(bucket.key)),
                            source: None,
                            value: atoms.resolve_value(bucket.value),
                        },
                    ));
                }
                for right in bucket.rights.iter().filter(|r| r.key == key) {
                    records.push((
                        priority_of(right.source),
                        ResultRecord {
                            key: with_data.then(|| atoms.resolve_str(right.key)),
                            source: with_data.then(|| atoms.resolve_str(right.source)),
                            value: atoms.resolve_value(right.value),
                        },
                    ));
                }
            }
        }
    }

    records.sort_by_key(|(priority, _)| *priority);
    records.into_iter().map(|(_, r)| r).collect()
}
