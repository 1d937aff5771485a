//! Durability layer for relata.
//!
//! Three pieces keep committed state recoverable:
//! - [`Oplist`]: the replayable operation log of one transaction
//! - [`Wal`]: the fixed-capacity ring-buffer write-ahead log
//! - [`snapshot`]: the serialized main database file
//!
//! A commit applies its oplist to the index and appends it to the log; a
//! checkpoint makes the snapshot durable and frees the ring behind it;
//! recovery loads the snapshot and replays the committed log tail.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod oplist;
pub mod snapshot;
pub mod wal;

pub use oplist::{Applied, Op, Oplist};
pub use snapshot::{SnapEdge, SnapValue, SnapshotData};
pub use wal::{LogNumber, RecoveryReport, Wal, DEFAULT_CAPACITY};
