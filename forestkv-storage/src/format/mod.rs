//! Header and entry framing for WAL files (C2).
//!
//! `LogFormat` is a capability set, not a base class: a format only needs to
//! implement header framing and entry framing over a [`LogFile`]. Two
//! concrete formats are provided, [`binary::BinaryFormat`] (canonical) and
//! [`json::JsonFormat`] (human-readable, same semantics). Both share the
//! data types defined here.

pub mod binary;
pub mod json;

use crate::io::{LogFile, Whence};
use forestkv_core::{Gid, Key, MachineId, Op, Result, Val};
use std::collections::HashMap;

/// Fixed size of the header region at the start of every log file.
pub const HEADER_SIZE: u64 = 256;

/// One mutation of a single key, as stored in a WAL entry.
///
/// `gid` and `num` are assigned by the owning [`crate::wal::Wal`] at append
/// time and must never be set by callers constructing an operation to save.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogOperation {
    pub op: Op,
    pub key: Key,
    pub value: Val,
    pub gid: Gid,
    pub prev_gid: Gid,
    pub prev_value: Val,
    pub seq: u64,
    pub machine_id: MachineId,
    pub prev_machine_id: MachineId,
    pub changes: HashMap<MachineId, i32>,
    pub prev_num: i64,
    pub num: i64,
}

impl LogOperation {
    /// Builds a root (`prev_num == 0`) operation for a fresh key, ready to be
    /// handed to [`crate::wal::Wal::append`]. `gid`/`num` are placeholders
    /// (`Gid::empty()`/`0`) and are overwritten by the WAL.
    pub fn root(op: Op, key: Key, value: Val, machine_id: MachineId) -> Self {
        let mut changes = HashMap::new();
        changes.insert(machine_id.clone(), 1);
        Self {
            op,
            key,
            value,
            gid: Gid::empty(),
            prev_gid: Gid::empty(),
            prev_value: Val::new(),
            seq: 0,
            machine_id,
            prev_machine_id: MachineId::new(),
            changes,
            prev_num: 0,
            num: 0,
        }
    }

    /// Builds a follow-up operation whose `prev_*` fields reference the
    /// record it supersedes.
    #[allow(clippy::too_many_arguments)]
    pub fn follow_up(
        op: Op,
        key: Key,
        value: Val,
        machine_id: MachineId,
        prev_gid: Gid,
        prev_value: Val,
        prev_machine_id: MachineId,
        prev_num: i64,
        seq: u64,
        changes: HashMap<MachineId, i32>,
    ) -> Self {
        Self {
            op,
            key,
            value,
            gid: Gid::empty(),
            prev_gid,
            prev_value,
            seq,
            machine_id,
            prev_machine_id,
            changes,
            prev_num,
            num: 0,
        }
    }
}

/// An atomic group of 1..N operations, as written/read as a single WAL
/// frame. All-or-nothing: readers deliver every op of one entry before
/// advancing to the next frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub ops: Vec<LogOperation>,
}

/// The fixed-size header every log file starts with.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileHeader {
    pub file_id: String,
    pub file_end: i64,
    pub last_entry_id: Gid,
    pub entry_num: i64,
}

impl FileHeader {
    pub fn fresh(file_id: String) -> Self {
        Self {
            file_id,
            file_end: HEADER_SIZE as i64,
            last_entry_id: Gid::empty(),
            entry_num: 0,
        }
    }
}

/// Where a [`LogFormat::append_entry`] call should write.
#[derive(Debug, Clone, Copy)]
pub enum EntryPos {
    /// Seek to end of file before writing.
    Append,
    /// Seek to this absolute byte offset, which must be `>= HEADER_SIZE`.
    Offset(u64),
}

/// Capability set shared by every concrete log file encoding.
///
/// Implementations must not hold any state across calls beyond what's
/// necessary to talk to the passed-in [`LogFile`] — all persistent state
/// lives in the file itself.
pub trait LogFormat {
    /// `true` iff `f`'s length is at least [`HEADER_SIZE`].
    fn is_valid_file(&self, f: &mut LogFile) -> Result<bool> {
        Ok(f.len()? >= HEADER_SIZE)
    }

    fn write_header(&self, f: &mut LogFile, header: &FileHeader) -> Result<()>;
    fn read_header(&self, f: &mut LogFile) -> Result<FileHeader>;

    /// Appends `entry` at `pos`, returning the number of bytes written.
    fn append_entry(&self, f: &mut LogFile, pos: EntryPos, entry: &LogEntry) -> Result<u64>;

    /// Reads one entry starting at absolute offset `pos`. Returns the entry
    /// and the number of bytes consumed (so callers can compute the next
    /// frame's offset).
    fn read_entry(&self, f: &mut LogFile, pos: u64) -> Result<(LogEntry, u64)>;

    /// Produces a fresh, independent handle to the same (stateless) format.
    /// Every format implementation here is a zero-sized marker, so this is
    /// just `Box::new(*self)` — it exists so a [`crate::wal::Wal`] can hand
    /// out iterators that open their own file handle under the same format
    /// without requiring `LogFormat: Clone` (which would break object
    /// safety).
    fn clone_format(&self) -> Box<dyn LogFormat>;
}

pub(crate) fn seek_to(f: &mut LogFile, pos: EntryPos) -> Result<u64> {
    match pos {
        EntryPos::Append => f.seek(0, Whence::End),
        EntryPos::Offset(off) => f.seek(off as i64, Whence::Start),
    }
}
