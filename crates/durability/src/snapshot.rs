//! Snapshots: the main database file.
//!
//! A snapshot is the full in-memory state serialized with bincode: the
//! interning tables, every stored relationship (each symmetric pair once,
//! in canonical direction), and the log number the snapshot is durable up
//! to. Edges reference the dumped tables by position, so loading
//! re-interns every atom through the live tables and replays the edges;
//! ids on disk never leak into a running handle.
//!
//! Publication is atomic: write to a temp file, fsync, rename over the
//! target.

use crate::wal::LogNumber;
use relata_core::{Atoms, Error, Result, Value, ValueId};
use relata_storage::{IndexInner, Tuple};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Magic bytes opening a snapshot file.
const SNAPSHOT_MAGIC: [u8; 8] = *b"RELSNAP1";

/// A value inside a snapshot: position into the dumped tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapValue {
    /// Index into the dumped integer table
    Int(u32),
    /// Index into the dumped string table
    Str(u32),
}

/// One canonical-direction relationship inside a snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SnapEdge {
    /// Index of the first key in the string table
    pub key_a: u32,
    /// First value
    pub val_a: SnapValue,
    /// Index of the second key
    pub key_b: u32,
    /// Second value
    pub val_b: SnapValue,
    /// Index of the source
    pub source: u32,
}

/// The serialized form of the whole store.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotData {
    /// Log number this snapshot is durable up to
    pub last_checkpoint: LogNumber,
    /// String table in id order
    pub strings: Vec<String>,
    /// Integer table in id order
    pub ints: Vec<i32>,
    /// Every relationship, symmetric pairs collapsed
    pub edges: Vec<SnapEdge>,
}

/// Capture the current state under the caller's index guard.
///
/// Edges are sorted into a canonical total order so the same logical
/// state always serializes to the same bytes, whatever insertion history
/// produced it.
pub fn capture(inner: &IndexInner, atoms: &Atoms, last_checkpoint: LogNumber) -> SnapshotData {
    let snap_value = |v: ValueId| match v {
        ValueId::Int(id) => SnapValue::Int(id.0),
        ValueId::Str(id) => SnapValue::Str(id.0),
    };
    let mut tuples = inner.canonical_edges();
    tuples.sort_by(|a, b| {
        atoms
            .resolve_str(a.key_a)
            .cmp(&atoms.resolve_str(b.key_a))
            .then_with(|| atoms.cmp_values(a.val_a, b.val_a))
            .then_with(|| atoms.resolve_str(a.key_b).cmp(&atoms.resolve_str(b.key_b)))
            .then_with(|| atoms.cmp_values(a.val_b, b.val_b))
            .then_with(|| atoms.resolve_str(a.source).cmp(&atoms.resolve_str(b.source)))
    });
    let edges = tuples
        .into_iter()
        .map(|t| SnapEdge {
            key_a: t.key_a.0,
            val_a: snap_value(t.val_a),
            key_b: t.key_b.0,
            val_b: snap_value(t.val_b),
            source: t.source.0,
        })
        .collect();
    SnapshotData {
        last_checkpoint,
        strings: atoms.dump_strings(),
        ints: atoms.dump_ints(),
        edges,
    }
}

/// Write a snapshot and atomically publish it at `path`.
pub fn write(path: &Path, data: &SnapshotData) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&SNAPSHOT_MAGIC)?;
        bincode::serialize_into(&mut writer, data)?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    // Make the rename itself durable
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    debug!(
        path = %path.display(),
        edges = data.edges.len(),
        checkpoint = data.last_checkpoint,
        "snapshot written"
    );
    Ok(())
}

/// Read a snapshot, if one exists.
///
/// A missing or empty file reads as `None` (a database that has never
/// checkpointed); anything else that fails to decode is corruption.
pub fn read(path: &Path) -> Result<Option<SnapshotData>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(Error::CorruptLog(format!(
            "bad snapshot magic in {}",
            path.display()
        )));
    }
    let data = bincode::deserialize_from(&mut reader)?;
    Ok(Some(data))
}

/// Load a snapshot into live tables and an empty index.
///
/// Every atom round-trips through interning; edge replay rebuilds both
/// directions of each relationship.
pub fn load(data: &SnapshotData, atoms: &Atoms, inner: &mut IndexInner) -> Result<()> {
    let strings: Vec<_> = data.strings.iter().map(|s| atoms.intern_str(s)).collect();
    let ints: Vec<_> = data.ints.iter().map(|&v| atoms.intern_int(v)).collect();

    let corrupt = || Error::CorruptLog("snapshot edge references missing atom".to_string());
    let resolve_value = |v: SnapValue| -> Result<ValueId> {
        match v {
            SnapValue::Int(i) => ints.get(i as usize).copied().map(ValueId::Int),
            SnapValue::Str(i) => strings.get(i as usize).copied().map(ValueId::Str),
        }
        .ok_or_else(corrupt)
    };

    for edge in &data.edges {
        let tuple = Tuple {
            key_a: *strings.get(edge.key_a as usize).ok_or_else(corrupt)?,
            val_a: resolve_value(edge.val_a)?,
            key_b: *strings.get(edge.key_b as usize).ok_or_else(corrupt)?,
            val_b: resolve_value(edge.val_b)?,
            source: *strings.get(edge.source as usize).ok_or_else(corrupt)?,
        };
        inner.insert_edge(&tuple);
    }
    Ok(())
}
