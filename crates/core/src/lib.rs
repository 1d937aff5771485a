//! Core types for the relata storage engine.
//!
//! This crate holds what every other layer depends on:
//! - [`Value`] / [`ValueId`]: caller-visible and interned value forms
//! - [`Atoms`]: the per-handle string and integer interning tables
//! - [`Pattern`]: glob patterns for source ranking and match filters
//! - [`Error`] / [`ErrorKind`] / [`Result`]: the engine-wide error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atoms;
pub mod error;
pub mod pattern;
pub mod value;

pub use atoms::{Atoms, IntId, StrId};
pub use error::{Error, ErrorKind, Result};
pub use pattern::Pattern;
pub use value::{Value, ValueId};
