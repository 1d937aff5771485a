//! Durability and crash-recovery tests.

mod common;

use common::{add_disagreeing_sources, check_db};
use relata_engine::Database;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_reopen_preserves_tuples_and_sources() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("media.db");

    let db = Database::builder().path(&path).create_new().open().unwrap();
    add_disagreeing_sources(&db);
    let before = check_db(&db);
    assert_eq!(before.len(), 4);
    db.close().unwrap();

    let db = Database::builder().path(&path).must_exist().open().unwrap();
    assert_eq!(check_db(&db), before);
    db.close().unwrap();
}

/// Copy the database files while the source handle is still open.
/// This is exactly what a crash leaves behind: a synced log and no
/// final snapshot.
fn crash_copy(dir: &std::path::Path, from: &std::path::Path) -> std::path::PathBuf {
    let to = dir.join("crashed.db");
    fs::copy(from, &to).unwrap();
    let mut from_log = from.as_os_str().to_os_string();
    from_log.push(".log");
    let mut to_log = to.as_os_str().to_os_string();
    to_log.push(".log");
    fs::copy(&from_log, &to_log).unwrap();
    to
}

#[test]
fn test_crash_keeps_committed_loses_uncommitted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("media.db");

    let db = Database::open(&path).unwrap();
    add_disagreeing_sources(&db);
    let committed = check_db(&db);

    // An open transaction that never commits
    let mut pending = db.begin();
    pending.add("entry", "ghost", "property", "x", "src").unwrap();

    let crashed = crash_copy(dir.path(), &path);
    pending.abort();

    let recovered = Database::open(&crashed).unwrap();
    assert_eq!(check_db(&recovered), committed);
    recovered.close().unwrap();
    db.close().unwrap();
}

#[test]
fn test_recovery_replays_multiple_transactions_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("media.db");

    let db = Database::open(&path).unwrap();
    for i in 0..20 {
        let mut txn = db.begin();
        txn.add("entry", format!("e{i}").as_str(), "seq", i, "src")
            .unwrap();
        txn.commit().unwrap();
    }
    // An add later deleted must not resurface after recovery
    let mut txn = db.begin();
    txn.add("entry", "victim", "property", "x", "src").unwrap();
    txn.commit().unwrap();
    let mut txn = db.begin();
    txn.del("entry", "victim", "property", "x", "src").unwrap();
    txn.commit().unwrap();

    let expected = check_db(&db);
    let crashed = crash_copy(dir.path(), &path);
    db.close().unwrap();

    let recovered = Database::open(&crashed).unwrap();
    assert_eq!(check_db(&recovered), expected);
    assert!(!check_db(&recovered).iter().any(|l| l.contains("victim")));
    recovered.close().unwrap();
}

#[test]
fn test_snapshot_plus_tail_reconstructs_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("media.db");

    // First life: commit, close (writes a snapshot + checkpoint)
    let db = Database::open(&path).unwrap();
    add_disagreeing_sources(&db);
    db.close().unwrap();

    // Second life: more commits land only in the log tail
    let db = Database::open(&path).unwrap();
    let mut txn = db.begin();
    txn.add("entry", "tail", "property", "y", "src").unwrap();
    txn.commit().unwrap();
    let expected = check_db(&db);

    let crashed = crash_copy(dir.path(), &path);
    db.close().unwrap();

    // Snapshot from the first life + log tail from the second
    let recovered = Database::open(&crashed).unwrap();
    assert_eq!(check_db(&recovered), expected);
    recovered.close().unwrap();
}

#[test]
fn test_reopen_after_delete_only_history() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("media.db");

    let db = Database::open(&path).unwrap();
    let mut txn = db.begin();
    txn.add("entry", "a", "property", "b", "src").unwrap();
    txn.commit().unwrap();
    let mut txn = db.begin();
    txn.del("entry", "a", "property", "b", "src").unwrap();
    txn.commit().unwrap();
    db.close().unwrap();

    let db = Database::open(&path).unwrap();
    assert_eq!(db.tuple_count(), 0);
    db.close().unwrap();
}
