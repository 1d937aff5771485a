//! Source preferences: glob-based ranking of assertion sources.
//!
//! A preference is an ordered list of glob patterns. The priority of a
//! source is the position of the first pattern matching its string form;
//! sources matching no pattern rank last. Priorities are memoized per
//! interned source id for the lifetime of the preference object, since
//! queries ask for the same handful of sources over and over.

use parking_lot::Mutex;
use relata_core::{Atoms, Pattern, StrId};
use rustc_hash::FxHashMap;

/// Priority of a source that matches none of the patterns.
pub const NO_PRIORITY: u32 = u32::MAX;

/// An ordered ranking of source strings.
pub struct SourcePref {
    patterns: Vec<Pattern>,
    memo: Mutex<FxHashMap<StrId, u32>>,
}

impl std::fmt::Debug for SourcePref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.patterns.iter().map(|p| p.as_str()))
            .finish()
    }
}

impl SourcePref {
    /// Build a preference from patterns in priority order (0 = highest).
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        SourcePref {
            patterns: patterns.iter().map(|p| Pattern::new(p.as_ref())).collect(),
            memo: Mutex::new(FxHashMap::default()),
        }
    }

    /// Priority of a source id: index of the first matching pattern, or
    /// [`NO_PRIORITY`] when nothing matches.
    pub fn priority(&self, atoms: &Atoms, source: StrId) -> u32 {
        if let Some(&p) = self.memo.lock().get(&source) {
            return p;
        }
        let text = atoms.resolve_str(source);
        let priority = self
            .patterns
            .iter()
            .position(|pat| pat.matches(&text))
            .map(|i| i as u32)
            .unwrap_or(NO_PRIORITY);
        self.memo.lock().insert(source, priority);
        priority
    }

    /// Number of patterns in this preference.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check whether the preference ranks nothing.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let atoms = Atoms::new();
        let pref = SourcePref::new(&["plugin/id3v2", "plugin/*", "*"]);
        let id3 = atoms.intern_str("plugin/id3v2");
        let mad = atoms.intern_str("plugin/mad");
        let client = atoms.intern_str("client/editor");
        assert_eq!(pref.priority(&atoms, id3), 0);
        assert_eq!(pref.priority(&atoms, mad), 1);
        assert_eq!(pref.priority(&atoms, client), 2);
    }

    #[test]
    fn test_no_match_ranks_last() {
        let atoms = Atoms::new();
        let pref = SourcePref::new(&["plugin/*"]);
        let other = atoms.intern_str("client/editor");
        assert_eq!(pref.priority(&atoms, other), NO_PRIORITY);
    }

    #[test]
    fn test_memoized_priority_is_stable() {
        let atoms = Atoms::new();
        let pref = SourcePref::new(&["a*", "b*"]);
        let src = atoms.intern_str("abc");
        let first = pref.priority(&atoms, src);
        assert_eq!(pref.priority(&atoms, src), first);
        assert_eq!(first, 0);
    }

    #[test]
    fn test_empty_pref() {
        let atoms = Atoms::new();
        let pref = SourcePref::new::<&str>(&[]);
        assert!(pref.is_empty());
        let src = atoms.intern_str("anything");
        assert_eq!(pref.priority(&atoms, src), NO_PRIORITY);
    }
}
