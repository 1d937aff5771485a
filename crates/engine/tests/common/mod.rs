//! Helpers shared by the engine integration tests.

use relata_engine::Database;
use relata_storage::{Condition, FetchSpec, Filter, FETCH_DATA};

/// Dump every stored relationship anchored on an "entry" as a sorted,
/// human-readable line: `entry=<v> <key>=<value> @<source>`.
///
/// Two databases holding the same facts dump identically, whatever order
/// the facts arrived in.
pub fn check_db(db: &Database) -> Vec<String> {
    let txn = db.begin_read();
    let spec = FetchSpec::new()
        .add("entry", None, FETCH_DATA)
        .add_all(None, FETCH_DATA);
    let cond = Condition::from(Filter::matches("entry", "*").on_parent());
    let result = txn.query(&spec, &cond);

    let mut lines = Vec::new();
    for row in 0..result.row_count() {
        let anchor = result.get(row, 0).expect("anchor record");
        for record in result.records(row, 1) {
            lines.push(format!(
                "entry={} {}={} @{}",
                anchor.value,
                record.key.as_deref().expect("fetched key"),
                record.value,
                record.source.as_deref().expect("fetched source"),
            ));
        }
    }
    txn.abort();
    lines.sort();
    lines
}

/// Commit the four-tuple fixture used by the durability scenarios.
pub fn add_disagreeing_sources(db: &Database) {
    let mut txn = db.begin();
    txn.add("entry", "a", "property", "a", "1").unwrap();
    txn.add("entry", "a", "property", "b", "2").unwrap();
    txn.add("entry", "b", "property", "a", "2").unwrap();
    txn.add("entry", "b", "property", "b", "1").unwrap();
    txn.commit().unwrap();
}
