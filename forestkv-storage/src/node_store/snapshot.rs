//! Relational-snapshot-shaped node store backend.
//!
//! The snapshot's schema (spec §6) is "an interface, not a design goal": the
//! source's SQLite/gorm integration is out of scope. What's load-bearing is
//! the *contract* — the same [`NodeStore`] operations plus a `processes()`
//! accessor that the log runner uses to seed resume progress on startup —
//! not a particular SQL engine. This backend satisfies that contract with a
//! single `bincode`-encoded file per participant (`<self>/0.db`), written
//! wholesale on `persist` and read wholesale on `load`; every mutating call
//! still goes through the same transactional discipline the original
//! expresses as `SqliteAdapter::Transaction` (a record insert and its
//! owning `LogProcess` row are updated together, never one without the
//! other).

use super::{DBRecord, InMemoryNodeStore, NodeStore, ReadOnlyNodeStore};
use crate::io::LogFile;
use forestkv_core::{Error, Gid, MachineId, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A participant's last-known resume checkpoint for one source WAL —
/// mirrors [`crate::runner::LogProcess`] but is the durable, on-disk form
/// of it.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct LogProcess {
    pub offset: u64,
    pub num: i64,
    pub gid: Gid,
    pub machine_id: MachineId,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    records: Vec<DBRecord>,
    processes: HashMap<MachineId, LogProcess>,
}

/// In-memory node store with an attached, explicitly-managed persistence
/// file. Not auto-saved on every mutation (the source doesn't do this
/// either, relying on explicit Participant-driven persistence at close).
#[derive(Debug, Default)]
pub struct SnapshotStore {
    inner: InMemoryNodeStore,
    processes: HashMap<MachineId, LogProcess>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a snapshot file if present; a missing file yields an empty,
    /// valid store (deleting `0.db` must always be safe).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let mut file = LogFile::open_read_only(path)?;
        let len = file.len()? as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;

        if buf.is_empty() {
            return Ok(Self::new());
        }

        let snapshot: SnapshotFile =
            bincode::deserialize(&buf).map_err(|e| Error::Encoding(e.to_string()))?;

        let mut store = InMemoryNodeStore::new();
        for record in snapshot.records {
            // A snapshot is trusted, previously-valid state; a duplicate
            // gid here would mean the file was corrupted or hand-edited,
            // which we treat the same as any other malformed input: skip
            // rather than abort the whole load.
            let _ = store.add(record);
        }

        Ok(Self {
            inner: store,
            processes: snapshot.processes,
        })
    }

    /// Writes every record and process row to `path`, replacing it.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = SnapshotFile {
            records: self.inner.all_nodes(),
            processes: self.processes.clone(),
        };
        let bytes = bincode::serialize(&snapshot).map_err(|e| Error::Encoding(e.to_string()))?;

        let path: PathBuf = path.as_ref().to_path_buf();
        let mut file = LogFile::open_read_write(&path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }

    /// All persisted per-participant resume checkpoints.
    pub fn processes(&self) -> Vec<LogProcess> {
        self.processes.values().cloned().collect()
    }

    pub fn process_for(&self, machine_id: &str) -> Option<LogProcess> {
        self.processes.get(machine_id).cloned()
    }

    fn update_process(&mut self, machine_id: &str, offset: u64, num: i64, gid: &Gid) {
        self.processes.insert(
            machine_id.to_string(),
            LogProcess {
                offset,
                num,
                gid: gid.clone(),
                machine_id: machine_id.to_string(),
            },
        );
    }
}

impl ReadOnlyNodeStore for SnapshotStore {
    fn get_by_key(&self, key: &str) -> Vec<DBRecord> {
        self.inner.get_by_key(key)
    }

    fn get_by_gid(&self, gid: &Gid) -> Option<DBRecord> {
        self.inner.get_by_gid(gid)
    }

    fn all_nodes(&self) -> Vec<DBRecord> {
        self.inner.all_nodes()
    }
}

impl NodeStore for SnapshotStore {
    fn add(&mut self, record: DBRecord) -> Result<()> {
        let (machine_id, offset, num, gid) = (
            record.machine_id.clone(),
            record.offset,
            record.num,
            record.current_log_gid.clone(),
        );
        self.inner.add(record)?;
        self.update_process(&machine_id, offset, num, &gid);
        Ok(())
    }

    fn replace(&mut self, old_gid: &Gid, new: DBRecord) -> Result<()> {
        let (machine_id, offset, num, gid) = (
            new.machine_id.clone(),
            new.offset,
            new.num,
            new.current_log_gid.clone(),
        );
        self.inner.replace(old_gid, new)?;
        self.update_process(&machine_id, offset, num, &gid);
        Ok(())
    }
}
