//! In-memory storage layer for relata.
//!
//! This crate implements the relation index and the query machinery:
//! - [`RelationIndex`]: reader-writer-guarded symmetric store with
//!   per-key ordered auxiliary indexes
//! - [`Arena`]: generational arena backing stable bucket handles
//! - [`SourcePref`]: glob-based ranking of assertion sources
//! - [`FetchSpec`] / [`Condition`]: query shapes
//! - [`ResultSet`]: the dense grid a query materializes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod index;
pub mod query;
pub mod resultset;
pub mod sourcepref;

pub use arena::{Arena, ArenaId};
pub use index::{Bucket, BucketId, IndexInner, KeyEntry, RelationIndex, RightSide, Tuple};
pub use query::{execute, Condition, CustomProbe, FetchSpec, Filter, FilterMode, FETCH_DATA};
pub use resultset::{ResultRecord, ResultSet};
pub use sourcepref::{SourcePref, NO_PRIORITY};
