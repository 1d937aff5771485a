//! Query results.
//!
//! A result set is a dense grid: one row per matching entry, one column
//! per fetch request. A cell holds zero or more records sorted by source
//! priority; walking a cell's list replaces the C-style `next(record)`
//! cursor of the original surface.

use relata_core::Value;
use smallvec::SmallVec;
use std::sync::Arc;

/// One fetched (key, source, value) record.
///
/// `key` and `source` are only populated when the fetch request asked for
/// full data; they are cheap clones out of the interning tables. The
/// anchor pair of a row is reported with `source == None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    /// Key the value was found under
    pub key: Option<Arc<str>>,
    /// Source that asserted the value
    pub source: Option<Arc<str>>,
    /// The value itself
    pub value: Value,
}

pub(crate) type Cell = SmallVec<[ResultRecord; 2]>;

/// A dense rows × columns grid of fetched records.
pub struct ResultSet {
    cols: usize,
    rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    pub(crate) fn new(cols: usize) -> Self {
        ResultSet {
            cols,
            rows: Vec::new(),
        }
    }

    pub(crate) fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.cols);
        self.rows.push(row);
    }

    /// Number of columns (one per fetch request).
    pub fn col_count(&self) -> usize {
        self.cols
    }

    /// Number of matching entries.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check for an empty result.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First record of a cell, or `None` for an empty or out-of-range
    /// cell.
    pub fn get(&self, row: usize, col: usize) -> Option<&ResultRecord> {
        self.records(row, col).first()
    }

    /// All records of a cell, ordered by source priority.
    pub fn records(&self, row: usize, col: usize) -> &[ResultRecord] {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn rec(v: &str) -> ResultRecord {
        ResultRecord {
            key: None,
            source: None,
            value: Value::from(v),
        }
    }

    #[test]
    fn test_empty_set() {
        let rs = ResultSet::new(2);
        assert_eq!(rs.col_count(), 2);
        assert_eq!(rs.row_count(), 0);
        assert!(rs.is_empty());
        assert!(rs.get(0, 0).is_none());
        assert!(rs.records(5, 9).is_empty());
    }

    #[test]
    fn test_get_returns_first_record() {
        let mut rs = ResultSet::new(1);
        rs.push_row(vec![smallvec![rec("first"), rec("second")]]);
        assert_eq!(rs.get(0, 0).unwrap().value, Value::from("first"));
        assert_eq!(rs.records(0, 0).len(), 2);
    }

    #[test]
    fn test_empty_cell() {
        let mut rs = ResultSet::new(2);
        rs.push_row(vec![smallvec![], smallvec![rec("x")]]);
        assert!(rs.get(0, 0).is_none());
        assert!(rs.get(0, 1).is_some());
    }
}
