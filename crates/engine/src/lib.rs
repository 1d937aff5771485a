//! Engine layer for relata.
//!
//! Composes the storage and durability layers into the public handle:
//! [`Database`] (open modes, advisory locking, recovery, lifecycle),
//! [`Transaction`] (buffered writes, the commit protocol, queries), and
//! the background snapshot worker.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
mod snapshot_worker;
pub mod transaction;

pub use database::{Config, Database, DatabaseBuilder};
pub use transaction::Transaction;
