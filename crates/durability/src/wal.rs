//! The write-ahead log: a fixed-capacity ring buffer file.
//!
//! Log numbers are 64-bit absolute byte positions; the file offset of a
//! position is `number % capacity`. Every record starts with a 12-byte
//! header `{type: u32 LE, num: u64 LE}` where `num` is the absolute
//! position of the header itself. A header read back with the wrong `num`
//! marks the end of valid data: either the torn tail of a crash or a
//! region the ring has wrapped past.
//!
//! # Record layout
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────────────────────────────┐
//! │ type (4)     │ num (8)      │ payload (by type)                     │
//! └──────────────┴──────────────┴───────────────────────────────────────┘
//!
//! ADD / DEL payload:
//! ┌─────────────────────────────┬─────────────────────────────────────┐
//! │ 5 × i32 LE lengths          │ key_a, val_a, key_b, val_b, source  │
//! └─────────────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! A value length of −1 signals a 4-byte `i32 LE` payload instead of raw
//! string bytes. Strings carry no terminators.
//!
//! Committed transactions are bracketed `BEGIN … END`; recovery treats a
//! partial bracket as uncommitted. Records never straddle the capacity
//! boundary: a `WRAP` header (or, when fewer than 12 bytes remain, the
//! boundary itself) sends both writer and reader back to offset 0.

use crate::oplist::{Op, Oplist};
use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use relata_core::{Atoms, Error, Result, Value, ValueId};
use relata_storage::Tuple;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Absolute byte position in the log (monotonic, never wraps).
pub type LogNumber = u64;

/// Default ring capacity: 2 MiB.
pub const DEFAULT_CAPACITY: u64 = 2 * 1024 * 1024;

/// Bytes of every record header.
const HEADER_SIZE: u64 = 12;

/// Bytes of the five-length modification header of ADD/DEL records.
const MOD_HEADER_SIZE: u64 = 20;

/// Space commits must leave free so a checkpoint bracket always fits,
/// including worst-case wrap overhead at the capacity boundary.
const CHECKPOINT_RESERVE: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum RecordType {
    /// File was freshly created
    Init = 0,
    /// Start of a committed transaction
    Begin = 1,
    /// Insert operation
    Add = 2,
    /// Delete operation
    Del = 3,
    /// Snapshot write began during this transaction
    Writing = 4,
    /// Transaction record complete
    End = 5,
    /// Snapshot durable up to the payload log number
    Checkpoint = 6,
    /// Rest of the buffer skipped; resume at offset 0
    Wrap = 7,
}

impl RecordType {
    fn from_u32(raw: u32) -> Option<RecordType> {
        match raw {
            0 => Some(RecordType::Init),
            1 => Some(RecordType::Begin),
            2 => Some(RecordType::Add),
            3 => Some(RecordType::Del),
            4 => Some(RecordType::Writing),
            5 => Some(RecordType::End),
            6 => Some(RecordType::Checkpoint),
            7 => Some(RecordType::Wrap),
            _ => None,
        }
    }
}

/// What a recovery scan found.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryReport {
    /// Committed transactions replayed
    pub transactions: usize,
    /// Position appends resume from
    pub frontier: LogNumber,
    /// Checkpoint in effect after the scan
    pub last_checkpoint: LogNumber,
}

struct WalInner {
    file: File,
    /// Next absolute append position
    next: LogNumber,
    /// Ring bytes at or after this position are live
    last_checkpoint: LogNumber,
    /// Frontier of the last durable snapshot (candidate from WRITING)
    last_synced: LogNumber,
}

/// The ring-buffer write-ahead log.
///
/// One mutex covers the file handle and all position counters; the log
/// file doubles as the advisory lock token for the whole database.
pub struct Wal {
    capacity: u64,
    path: PathBuf,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Open or create the log file.
    ///
    /// A fresh file is sized to `capacity` and stamped with an INIT
    /// record; an existing file keeps its own capacity. Counters are
    /// provisional until [`Wal::recover`] runs.
    pub fn open(path: &Path, capacity: u64) -> Result<Wal> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| Error::LogOpen {
                path: path.to_path_buf(),
                source,
            })?;

        let len = file.metadata()?.len();
        let capacity = if len == 0 {
            file.set_len(capacity)?;
            let mut header = Vec::with_capacity(HEADER_SIZE as usize);
            header.extend_from_slice(&(RecordType::Init as u32).to_le_bytes());
            header.extend_from_slice(&0u64.to_le_bytes());
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header)?;
            file.sync_data()?;
            debug!(path = %path.display(), capacity, "created log file");
            capacity
        } else {
            len
        };

        Ok(Wal {
            capacity,
            path: path.to_path_buf(),
            inner: Mutex::new(WalInner {
                file,
                next: HEADER_SIZE,
                last_checkpoint: 0,
                last_synced: 0,
            }),
        })
    }

    /// Ring capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next absolute append position.
    pub fn frontier(&self) -> LogNumber {
        self.inner.lock().next
    }

    /// The checkpoint currently gating ring reuse.
    pub fn last_checkpoint(&self) -> LogNumber {
        self.inner.lock().last_checkpoint
    }

    /// Frontier of the last durable snapshot.
    ///
    /// Usually equal to [`Wal::last_checkpoint`]; it can run ahead when a
    /// recovered tail carried a writing sentinel whose checkpoint record
    /// never made it to disk.
    pub fn last_synced(&self) -> LogNumber {
        self.inner.lock().last_synced
    }

    /// Live bytes between the checkpoint and the append frontier.
    pub fn used(&self) -> u64 {
        let inner = self.inner.lock();
        inner.next - inner.last_checkpoint
    }

    /// Try to take the advisory whole-file lock on the log.
    ///
    /// The log file is the lock token for the database: a failure means
    /// another handle (this process or another) has it open.
    pub fn try_lock_exclusive(&self) -> std::io::Result<()> {
        fs2::FileExt::try_lock_exclusive(&self.inner.lock().file)
    }

    /// Append one committed transaction as a `BEGIN … END` bracket.
    ///
    /// The record sizes are planned first; if the bracket cannot fit
    /// without overwriting un-checkpointed bytes (keeping room for a
    /// checkpoint bracket), nothing is written and `LogFull` is returned.
    /// The append is flushed and fsynced before returning.
    pub fn append_commit(&self, atoms: &Atoms, ops: &Oplist) -> Result<()> {
        let mut payloads: Vec<(RecordType, Vec<u8>)> = Vec::with_capacity(ops.len() + 2);
        payloads.push((RecordType::Begin, Vec::new()));
        for op in ops.iter() {
            match op {
                Op::Add(t) => payloads.push((RecordType::Add, encode_tuple(atoms, t))),
                Op::Del(t) => payloads.push((RecordType::Del, encode_tuple(atoms, t))),
                Op::Writing => payloads.push((RecordType::Writing, Vec::new())),
            }
        }
        payloads.push((RecordType::End, Vec::new()));

        self.append_records(&payloads, self.capacity.saturating_sub(CHECKPOINT_RESERVE))
    }

    /// Append a `BEGIN / CHECKPOINT(number) / END` bracket and free the
    /// ring up through `number`.
    pub fn append_checkpoint(&self, number: LogNumber) -> Result<()> {
        let payload = number.to_le_bytes().to_vec();
        let records = vec![
            (RecordType::Begin, Vec::new()),
            (RecordType::Checkpoint, payload),
            (RecordType::End, Vec::new()),
        ];
        self.append_records(&records, self.capacity)?;

        let mut inner = self.inner.lock();
        inner.last_checkpoint = number;
        inner.last_synced = number;
        debug!(checkpoint = number, "log checkpoint installed");
        Ok(())
    }

    fn append_records(&self, payloads: &[(RecordType, Vec<u8>)], budget: u64) -> Result<()> {
        let mut inner = self.inner.lock();

        // Plan positions, inserting wrap records at the boundary
        let mut writes: Vec<(LogNumber, RecordType, &[u8])> = Vec::with_capacity(payloads.len());
        let mut next = inner.next;
        for (ty, payload) in payloads {
            let size = HEADER_SIZE + payload.len() as u64;
            if size > self.capacity {
                return Err(Error::LogFull {
                    needed: size,
                    available: self.capacity,
                });
            }
            let offset = next % self.capacity;
            if offset + size > self.capacity {
                if offset + HEADER_SIZE <= self.capacity {
                    writes.push((next, RecordType::Wrap, &[]));
                }
                next = (next / self.capacity + 1) * self.capacity;
            }
            writes.push((next, *ty, payload));
            next += size;
        }

        let needed = next - inner.next;
        let available = budget.saturating_sub(inner.next - inner.last_checkpoint);
        if needed > available {
            return Err(Error::LogFull { needed, available });
        }

        for (num, ty, payload) in writes {
            let mut bytes = Vec::with_capacity(HEADER_SIZE as usize + payload.len());
            bytes.extend_from_slice(&(ty as u32).to_le_bytes());
            bytes.extend_from_slice(&num.to_le_bytes());
            bytes.extend_from_slice(payload);
            inner.file.seek(SeekFrom::Start(num % self.capacity))?;
            inner.file.write_all(&bytes)?;
        }
        inner.file.flush()?;
        inner.file.sync_data()?;
        inner.next = next;
        Ok(())
    }

    /// Replay the committed tail of the log.
    ///
    /// Scans forward from `start` (the snapshot's checkpoint), handing
    /// each complete `BEGIN … END` bracket to `apply` as an oplist. The
    /// scan stops at the first header whose stored number disagrees with
    /// its position, whose type is unknown, or whose payload does not
    /// decode; everything after the last good END is an overwritable
    /// tail. Appends resume at the reported frontier.
    pub fn recover(
        &self,
        atoms: &Atoms,
        start: LogNumber,
        mut apply: impl FnMut(&Oplist) -> Result<()>,
    ) -> Result<RecoveryReport> {
        let mut inner = self.inner.lock();
        let capacity = self.capacity;

        let mut pos = start % capacity;
        let mut round = start / capacity;
        let mut frontier = start.max(HEADER_SIZE);
        let mut last_checkpoint = start;
        let mut last_synced = start;
        let mut transactions = 0usize;

        let mut bracket: Option<(LogNumber, Oplist)> = None;
        let mut pending_checkpoint: Option<LogNumber> = None;
        let mut writing_seen = false;

        'scan: loop {
            if pos + HEADER_SIZE > capacity {
                round += 1;
                pos = 0;
            }
            let abs = round * capacity + pos;

            inner.file.seek(SeekFrom::Start(pos))?;
            let ty_raw = inner.file.read_u32::<LittleEndian>()?;
            let num = inner.file.read_u64::<LittleEndian>()?;
            if num != abs {
                break;
            }
            let ty = match RecordType::from_u32(ty_raw) {
                Some(ty) => ty,
                None => break,
            };

            match ty {
                RecordType::Init => {
                    pos += HEADER_SIZE;
                    if bracket.is_none() {
                        frontier = abs + HEADER_SIZE;
                    }
                }
                RecordType::Wrap => {
                    round += 1;
                    pos = 0;
                    if bracket.is_none() {
                        frontier = round * capacity;
                    }
                }
                RecordType::Begin => {
                    bracket = Some((abs, Oplist::new()));
                    pending_checkpoint = None;
                    writing_seen = false;
                    pos += HEADER_SIZE;
                }
                RecordType::Add | RecordType::Del => {
                    let ops = match bracket.as_mut() {
                        Some((_, ops)) => ops,
                        // Operation outside a bracket: invalid tail
                        None => break,
                    };
                    let tuple = match decode_tuple(&mut inner.file, atoms, pos, capacity) {
                        Ok(Some((tuple, consumed))) => {
                            pos += consumed;
                            tuple
                        }
                        Ok(None) => break 'scan,
                        Err(e) => return Err(e),
                    };
                    if ty == RecordType::Add {
                        ops.push_add(tuple);
                    } else {
                        ops.push_del(tuple);
                    }
                }
                RecordType::Writing => {
                    if bracket.is_none() {
                        break;
                    }
                    if let Some((_, ops)) = bracket.as_mut() {
                        ops.mark_writing();
                    }
                    writing_seen = true;
                    pos += HEADER_SIZE;
                }
                RecordType::Checkpoint => {
                    if bracket.is_none() {
                        break;
                    }
                    if pos + HEADER_SIZE + 8 > capacity {
                        break;
                    }
                    pending_checkpoint = Some(inner.file.read_u64::<LittleEndian>()?);
                    pos += HEADER_SIZE + 8;
                }
                RecordType::End => {
                    let (begin, ops) = match bracket.take() {
                        Some(b) => b,
                        None => break,
                    };
                    if let Err(e) = apply(&ops) {
                        warn!(error = %e, position = abs, "replay failed; halting at last good commit");
                        break;
                    }
                    if !ops.is_empty() {
                        transactions += 1;
                    }
                    if let Some(cp) = pending_checkpoint.take() {
                        last_checkpoint = cp;
                        last_synced = cp;
                    } else if writing_seen {
                        last_synced = begin;
                    }
                    pos += HEADER_SIZE;
                    frontier = abs + HEADER_SIZE;
                }
            }
        }

        inner.next = frontier;
        inner.last_checkpoint = last_checkpoint;
        inner.last_synced = last_synced;
        debug!(
            transactions,
            frontier, last_checkpoint, "log recovery complete"
        );
        Ok(RecoveryReport {
            transactions,
            frontier,
            last_checkpoint,
        })
    }
}

/// Encode the mod header and payloads of one tuple.
fn encode_tuple(atoms: &Atoms, t: &Tuple) -> Vec<u8> {
    fn value_bytes(atoms: &Atoms, v: ValueId) -> (i32, Vec<u8>) {
        match atoms.resolve_value(v) {
            Value::Int(i) => (-1, i.to_le_bytes().to_vec()),
            Value::Str(s) => (s.len() as i32, s.into_bytes()),
        }
    }

    let key_a = atoms.resolve_str(t.key_a);
    let key_b = atoms.resolve_str(t.key_b);
    let source = atoms.resolve_str(t.source);
    let (va_len, va_bytes) = value_bytes(atoms, t.val_a);
    let (vb_len, vb_bytes) = value_bytes(atoms, t.val_b);

    let mut buf = Vec::with_capacity(
        MOD_HEADER_SIZE as usize + key_a.len() + va_bytes.len() + key_b.len() + vb_bytes.len()
            + source.len(),
    );
    // Lengths never overflow i32: they are in-memory string lengths
    buf.extend_from_slice(&(key_a.len() as i32).to_le_bytes());
    buf.extend_from_slice(&va_len.to_le_bytes());
    buf.extend_from_slice(&(key_b.len() as i32).to_le_bytes());
    buf.extend_from_slice(&vb_len.to_le_bytes());
    buf.extend_from_slice(&(source.len() as i32).to_le_bytes());
    buf.extend_from_slice(key_a.as_bytes());
    buf.extend_from_slice(&va_bytes);
    buf.extend_from_slice(key_b.as_bytes());
    buf.extend_from_slice(&vb_bytes);
    buf.extend_from_slice(source.as_bytes());
    buf
}

/// Decode an ADD/DEL payload at `pos` (header already consumed).
///
/// Returns the tuple and the total record size, or `None` when the
/// lengths are implausible (the scan treats that as end of valid data).
fn decode_tuple(
    file: &mut File,
    atoms: &Atoms,
    pos: u64,
    capacity: u64,
) -> Result<Option<(Tuple, u64)>> {
    if pos + HEADER_SIZE + MOD_HEADER_SIZE > capacity {
        return Ok(None);
    }
    let mut lengths = [0i32; 5];
    for len in lengths.iter_mut() {
        *len = file.read_i32::<LittleEndian>()?;
    }
    let [ka_len, va_len, kb_len, vb_len, s_len] = lengths;
    if ka_len < 0 || kb_len < 0 || s_len < 0 || va_len < -1 || vb_len < -1 {
        return Ok(None);
    }

    let span = |len: i32| if len == -1 { 4u64 } else { len as u64 };
    let payload = span(ka_len) + span(va_len) + span(kb_len) + span(vb_len) + span(s_len);
    let total = HEADER_SIZE + MOD_HEADER_SIZE + payload;
    if pos + total > capacity {
        return Ok(None);
    }

    fn read_string(file: &mut File, len: i32) -> Result<Option<String>> {
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf).ok())
    }
    let key_a = read_string(file, ka_len)?;
    let val_a = read_value(file, atoms, va_len)?;
    let key_b = read_string(file, kb_len)?;
    let val_b = read_value(file, atoms, vb_len)?;
    let source = read_string(file, s_len)?;

    match (key_a, val_a, key_b, val_b, source) {
        (Some(ka), Some(va), Some(kb), Some(vb), Some(s)) => Ok(Some((
            Tuple {
                key_a: atoms.intern_str(&ka),
                val_a: va,
                key_b: atoms.intern_str(&kb),
                val_b: vb,
                source: atoms.intern_str(&s),
            },
            total,
        ))),
        _ => Ok(None),
    }
}

fn read_value(file: &mut File, atoms: &Atoms, len: i32) -> Result<Option<ValueId>> {
    if len == -1 {
        let v = file.read_i32::<LittleEndian>()?;
        Ok(Some(ValueId::Int(atoms.intern_int(v))))
    } else {
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)
            .ok()
            .map(|s| ValueId::Str(atoms.intern_str(&s))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relata_storage::RelationIndex;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn tuple(atoms: &Atoms, ka: &str, va: Value, kb: &str, vb: Value, src: &str) -> Tuple {
        Tuple {
            key_a: atoms.intern_str(ka),
            val_a: atoms.intern_value(&va),
            key_b: atoms.intern_str(kb),
            val_b: atoms.intern_value(&vb),
            source: atoms.intern_str(src),
        }
    }

    fn commit_one(wal: &Wal, atoms: &Atoms, t: Tuple) {
        let mut ops = Oplist::new();
        ops.push_add(t);
        wal.append_commit(atoms, &ops).unwrap();
    }

    #[test]
    fn test_fresh_log_has_init() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let wal = Wal::open(&path, 4096).unwrap();
        assert_eq!(wal.capacity(), 4096);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

        let atoms = Atoms::new();
        let report = wal.recover(&atoms, 0, |_| Ok(())).unwrap();
        assert_eq!(report.transactions, 0);
        assert_eq!(report.frontier, HEADER_SIZE);
    }

    #[test]
    fn test_commit_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let atoms = Arc::new(Atoms::new());

        {
            let wal = Wal::open(&path, 4096).unwrap();
            wal.recover(&atoms, 0, |_| Ok(())).unwrap();
            commit_one(
                &wal,
                &atoms,
                tuple(
                    &atoms,
                    "entry",
                    Value::from("a"),
                    "property",
                    Value::Int(42),
                    "src",
                ),
            );
        }

        let reopened = Wal::open(&path, 4096).unwrap();
        let atoms2 = Arc::new(Atoms::new());
        let index = RelationIndex::new(Arc::clone(&atoms2));
        let report = reopened
            .recover(&atoms2, 0, |ops| {
                ops.apply(&mut index.write()).map(|_| ())
            })
            .unwrap();
        assert_eq!(report.transactions, 1);

        let inner = index.read();
        assert_eq!(inner.tuple_count(), 1);
        let t = inner.canonical_edges()[0];
        assert_eq!(&*atoms2.resolve_str(t.source), "src");
        // The int value survived as an int
        let has_int = atoms2.resolve_value(t.val_a) == Value::Int(42)
            || atoms2.resolve_value(t.val_b) == Value::Int(42);
        assert!(has_int);
    }

    #[test]
    fn test_partial_bracket_is_uncommitted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let atoms = Arc::new(Atoms::new());

        let frontier_before;
        {
            let wal = Wal::open(&path, 4096).unwrap();
            wal.recover(&atoms, 0, |_| Ok(())).unwrap();
            commit_one(
                &wal,
                &atoms,
                tuple(&atoms, "a", Value::from("1"), "b", Value::from("2"), "s"),
            );
            frontier_before = wal.frontier();

            // Simulate a torn write: a BEGIN and an ADD but no END
            let mut ops = Oplist::new();
            ops.push_add(tuple(
                &atoms,
                "x",
                Value::from("1"),
                "y",
                Value::from("2"),
                "s",
            ));
            wal.append_commit(&atoms, &ops).unwrap();
        }

        // Truncate the END record away by zeroing its header
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = OpenOptions::new().write(true).open(&path).unwrap();
            // The second bracket's END is the last 12 bytes before the
            // frontier; overwrite them with zeros
            let wal_probe = Wal::open(&path, 4096).unwrap();
            let frontier = wal_probe.recover(&atoms, 0, |_| Ok(())).unwrap().frontier;
            drop(wal_probe);
            f.seek(SeekFrom::Start((frontier - HEADER_SIZE) % 4096)).unwrap();
            f.write_all(&[0u8; HEADER_SIZE as usize]).unwrap();
            f.sync_data().unwrap();
        }

        let wal = Wal::open(&path, 4096).unwrap();
        let atoms2 = Atoms::new();
        let mut applied = 0;
        let report = wal.recover(&atoms2, 0, |_| {
            applied += 1;
            Ok(())
        }).unwrap();
        // Only the first, complete bracket replays
        assert_eq!(report.transactions, 1);
        assert_eq!(applied, 1);
        assert_eq!(report.frontier, frontier_before);
    }

    #[test]
    fn test_log_full_refused_before_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let atoms = Atoms::new();
        let wal = Wal::open(&path, 512).unwrap();
        wal.recover(&atoms, 0, |_| Ok(())).unwrap();

        let t = tuple(
            &atoms,
            "some_key",
            Value::from("some_value"),
            "other_key",
            Value::from("other_value"),
            "source",
        );
        let mut err = None;
        for _ in 0..10 {
            let mut ops = Oplist::new();
            ops.push_add(t);
            match wal.append_commit(&atoms, &ops) {
                Ok(()) => {}
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        let err = err.expect("ring must fill up");
        assert!(err.is_log_full());

        // Checkpointing frees the ring and commits succeed again
        wal.append_checkpoint(wal.frontier()).unwrap();
        let mut ops = Oplist::new();
        ops.push_add(t);
        wal.append_commit(&atoms, &ops).unwrap();
    }

    #[test]
    fn test_wrap_around_preserves_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let atoms = Arc::new(Atoms::new());
        let capacity = 1024u64;
        let wal = Wal::open(&path, capacity).unwrap();
        wal.recover(&atoms, 0, |_| Ok(())).unwrap();

        // Many commit/checkpoint cycles force the ring to wrap repeatedly
        for i in 0..50 {
            let t = tuple(
                &atoms,
                "entry",
                Value::from(format!("val-{i}")),
                "property",
                Value::Int(i),
                "src",
            );
            let mut ops = Oplist::new();
            ops.push_add(t);
            wal.append_commit(&atoms, &ops).unwrap();
            wal.append_checkpoint(wal.frontier()).unwrap();
        }
        assert!(wal.frontier() > capacity, "ring must have wrapped");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), capacity);

        // A reopen from the installed checkpoint finds a clean tail
        let last_checkpoint = wal.last_checkpoint();
        drop(wal);
        let wal = Wal::open(&path, capacity).unwrap();
        let atoms2 = Atoms::new();
        let report = wal.recover(&atoms2, last_checkpoint, |_| Ok(())).unwrap();
        assert_eq!(report.transactions, 0);
        assert_eq!(report.last_checkpoint, last_checkpoint);
    }

    #[test]
    fn test_checkpoint_resolves_inside_bracket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let atoms = Atoms::new();
        let wal = Wal::open(&path, 4096).unwrap();
        wal.recover(&atoms, 0, |_| Ok(())).unwrap();

        wal.append_checkpoint(wal.frontier()).unwrap();
        let installed = wal.last_checkpoint();

        let wal2 = Wal::open(&path, 4096).unwrap();
        let report = wal2.recover(&atoms, 0, |_| Ok(())).unwrap();
        assert_eq!(report.last_checkpoint, installed);
    }

    #[test]
    fn test_writing_sentinel_survives_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let atoms = Arc::new(Atoms::new());
        let wal = Wal::open(&path, 4096).unwrap();
        wal.recover(&atoms, 0, |_| Ok(())).unwrap();

        let mut ops = Oplist::new();
        ops.push_add(tuple(
            &atoms,
            "entry",
            Value::from("a"),
            "property",
            Value::from("b"),
            "s",
        ));
        ops.mark_writing();
        wal.append_commit(&atoms, &ops).unwrap();

        let wal2 = Wal::open(&path, 4096).unwrap();
        let atoms2 = Atoms::new();
        let mut saw_writing = false;
        wal2.recover(&atoms2, 0, |ops| {
            saw_writing = ops.has_writing();
            Ok(())
        })
        .unwrap();
        assert!(saw_writing);
        // The sentinel marks the snapshot boundary at the bracket start
        assert_eq!(wal2.last_synced(), HEADER_SIZE);
    }

    #[test]
    fn test_replay_is_idempotent_over_same_base() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        let atoms = Arc::new(Atoms::new());
        let wal = Wal::open(&path, 8192).unwrap();
        wal.recover(&atoms, 0, |_| Ok(())).unwrap();

        for i in 0..5 {
            commit_one(
                &wal,
                &atoms,
                tuple(
                    &atoms,
                    "entry",
                    Value::from(format!("e{i}")),
                    "property",
                    Value::from("v"),
                    "s",
                ),
            );
        }
        drop(wal);

        let run = || {
            let wal = Wal::open(&path, 8192).unwrap();
            let atoms = Arc::new(Atoms::new());
            let index = RelationIndex::new(Arc::clone(&atoms));
            wal.recover(&atoms, 0, |ops| ops.apply(&mut index.write()).map(|_| ()))
                .unwrap();
            let inner = index.read();
            let mut edges: Vec<String> = inner
                .canonical_edges()
                .iter()
                .map(|t| {
                    format!(
                        "{}={} {}={} @{}",
                        atoms.resolve_str(t.key_a),
                        atoms.resolve_value(t.val_a),
                        atoms.resolve_str(t.key_b),
                        atoms.resolve_value(t.val_b),
                        atoms.resolve_str(t.source),
                    )
                })
                .collect();
            edges.sort();
            edges
        };
        assert_eq!(run(), run());
    }
}
