//! # relata
//!
//! An embedded, single-process storage engine for media library
//! metadata. The data model is not rows and tables but a symmetric,
//! interned graph: each stored fact is a `(key, value, key, value)`
//! relationship asserted by a named source, queryable from either side.
//! Durability comes from a fixed-size ring-buffer write-ahead log plus
//! periodic snapshots, so recovery time is bounded by the log capacity.
//!
//! # Quick start
//!
//! ```no_run
//! use relata::{Condition, Database, FetchSpec, Filter, FETCH_DATA};
//!
//! fn main() -> relata::Result<()> {
//!     let db = Database::open("./media.db")?;
//!
//!     let mut txn = db.begin();
//!     txn.add("entry", "song.flac", "artist", "Mingus", "plugin/flac")?;
//!     txn.add("entry", "song.flac", "rating", 5, "client/ui")?;
//!     txn.commit()?;
//!
//!     let txn = db.begin_read();
//!     let spec = FetchSpec::new().add("artist", None, FETCH_DATA);
//!     let cond = Condition::from(Filter::equal("entry", "song.flac").on_parent());
//!     let result = txn.query(&spec, &cond);
//!     assert_eq!(result.row_count(), 1);
//!     txn.abort();
//!
//!     db.close()
//! }
//! ```
//!
//! # Architecture
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `relata-core` | values, interning tables, glob patterns, errors |
//! | `relata-storage` | relation index, source preferences, queries |
//! | `relata-durability` | oplists, ring-buffer WAL, snapshots |
//! | `relata-engine` | database handle, transactions, lifecycle |
//!
//! Only the surface re-exported here is stable.

pub use relata_core::{Error, ErrorKind, Pattern, Result, Value};
pub use relata_engine::{Config, Database, DatabaseBuilder, Transaction};
pub use relata_storage::{
    Condition, FetchSpec, Filter, FilterMode, ResultRecord, ResultSet, SourcePref, FETCH_DATA,
};
