//! Participant façade (C7): the public entry point. Owns one writable WAL,
//! the in-memory node store, and drives the log runner across every peer
//! discovered in the working directory.

use crate::format::binary::BinaryFormat;
use crate::format::json::JsonFormat;
use crate::format::{LogFormat, LogOperation, HEADER_SIZE};
use crate::node_store::snapshot::SnapshotStore;
use crate::node_store::{DBRecord, InMemoryNodeStore, NodeStore, ReadOnlyNodeStore};
use crate::runner::{self, LogInput, LogProcess};
use crate::value::Value;
use crate::wal::{LogOperationHandle, Wal};
use forestkv_core::{Error, Gid, Key, MachineId, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const WAL_FILE_NAME: &str = "0.wal";
const DB_FILE_NAME: &str = "0.db";

/// Which concrete [`LogFormat`] a participant's own WAL (and the ones it
/// reads from peers) is encoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormatKind {
    #[default]
    Binary,
    Json,
}

impl LogFormatKind {
    fn new_format(self) -> Box<dyn LogFormat> {
        match self {
            LogFormatKind::Binary => Box::new(BinaryFormat),
            LogFormatKind::Json => Box::new(JsonFormat),
        }
    }
}

/// Configuration for [`Participant::init`].
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// After this many appends to our own WAL, flush and close it; the next
    /// append transparently reopens it. Bounds how many file descriptors a
    /// long-lived participant holds open.
    pub write_flush_threshold: usize,
    pub log_format: LogFormatKind,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            write_flush_threshold: 1,
            log_format: LogFormatKind::default(),
        }
    }
}

fn wal_path(working_dir: &Path, machine_id: &str) -> PathBuf {
    working_dir.join(machine_id).join(WAL_FILE_NAME)
}

fn db_path(working_dir: &Path, machine_id: &str) -> PathBuf {
    working_dir.join(machine_id).join(DB_FILE_NAME)
}

/// Every immediate subdirectory of `working_dir` containing a `0.wal` file
/// is a peer. Scanned once, at `init`, and cached for the participant's
/// lifetime — a participant directory that appears afterwards is not picked
/// up until the next `init`.
fn discover_peers(working_dir: &Path) -> Result<Vec<MachineId>> {
    let mut peers = Vec::new();
    for entry in std::fs::read_dir(working_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if entry.path().join(WAL_FILE_NAME).is_file() {
            if let Some(name) = entry.file_name().to_str() {
                peers.push(name.to_string());
            }
        }
    }
    peers.sort();
    Ok(peers)
}

/// Wraps the participant's own writable WAL with a write-threshold
/// close/reopen policy: after `write_flush_threshold` appends the file is
/// flushed and closed, and the next append reopens it from scratch
/// (re-reading the header, recomputing its position). Bounds the number of
/// descriptors a long-lived participant holds open and exercises the WAL's
/// reopen path on every normal run, not only in tests.
struct OwnWal {
    path: PathBuf,
    format_kind: LogFormatKind,
    write_flush_threshold: usize,
    count: usize,
    wal: Option<Wal>,
}

impl OwnWal {
    fn open(path: PathBuf, format_kind: LogFormatKind, write_flush_threshold: usize) -> Result<Self> {
        // Ensure the file exists (and its header is initialized) up front,
        // matching the original's eager `initParticipant` WAL creation.
        let wal = Wal::open(&path, format_kind.new_format(), false)?;
        Ok(Self {
            path,
            format_kind,
            write_flush_threshold,
            count: 0,
            wal: Some(wal),
        })
    }

    fn get_mut(&mut self) -> Result<&mut Wal> {
        if self.wal.is_none() {
            self.wal = Some(Wal::open(&self.path, self.format_kind.new_format(), false)?);
        }
        Ok(self.wal.as_mut().expect("just initialized"))
    }

    fn offset(&mut self) -> Result<u64> {
        Ok(self.get_mut()?.offset())
    }

    fn append(&mut self, ops: Vec<LogOperationHandle>) -> Result<(Gid, i64)> {
        let wal = self.get_mut()?;
        let result = wal.append(ops)?;

        self.count += 1;
        if self.count >= self.write_flush_threshold {
            if let Some(mut wal) = self.wal.take() {
                if let Err(e) = wal.flush().and_then(|_| wal.close()) {
                    log::warn!("own wal at {} failed to flush/close: {e}", self.path.display());
                }
            }
            self.count = 0;
        }

        Ok(result)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut wal) = self.wal.take() {
            wal.close()?;
        }
        Ok(())
    }
}

/// Public façade over the replicated key-value store.
pub struct Participant {
    working_dir: PathBuf,
    machine_id: MachineId,
    config: ParticipantConfig,
    store: InMemoryNodeStore,
    progress: HashMap<MachineId, LogProcess>,
    own_wal: OwnWal,
    /// Peers discovered once at `init`, reused for every `run_log_till_end`
    /// and `close` for the rest of this participant's lifetime.
    peers: Vec<MachineId>,
}

impl Participant {
    /// Resolves `working_dir` to an absolute path (creating it if missing),
    /// discovers peers, creates our own WAL if absent, and loads any
    /// durable snapshot plus its resume progress.
    pub fn init(working_dir: impl AsRef<Path>, machine_id: impl Into<MachineId>) -> Result<Self> {
        Self::init_with_config(working_dir, machine_id, ParticipantConfig::default())
    }

    pub fn init_with_config(
        working_dir: impl AsRef<Path>,
        machine_id: impl Into<MachineId>,
        config: ParticipantConfig,
    ) -> Result<Self> {
        let machine_id = machine_id.into();
        std::fs::create_dir_all(working_dir.as_ref())?;
        let working_dir = std::fs::canonicalize(working_dir.as_ref())?;

        let own_wal = OwnWal::open(
            wal_path(&working_dir, &machine_id),
            config.log_format,
            config.write_flush_threshold,
        )?;

        let snapshot = SnapshotStore::load(db_path(&working_dir, &machine_id))?;
        let mut store = InMemoryNodeStore::new();
        store.merge(&snapshot)?;

        let mut progress = HashMap::new();
        for p in snapshot.processes() {
            progress.insert(
                p.machine_id.clone(),
                LogProcess {
                    offset: p.offset,
                    num: p.num,
                    gid: p.gid,
                },
            );
        }

        let peers = discover_peers(&working_dir)?;
        log::info!(
            "participant {machine_id} initialized at {} with {} peer(s)",
            working_dir.display(),
            peers.len()
        );

        Ok(Self {
            working_dir,
            machine_id,
            config,
            store,
            progress,
            own_wal,
            peers,
        })
    }

    fn build_inputs(&self) -> Vec<LogInput> {
        let mut inputs = Vec::with_capacity(self.peers.len());
        for peer in &self.peers {
            let progress = self.progress.get(peer).cloned().unwrap_or(LogProcess {
                offset: HEADER_SIZE,
                num: 0,
                gid: Gid::empty(),
            });
            inputs.push(LogInput {
                machine_id: peer.clone(),
                path: wal_path(&self.working_dir, peer),
                format: self.config.log_format.new_format(),
                progress,
            });
        }
        inputs
    }

    /// Replays every discoverable WAL (ours included) into the node store,
    /// then requires that our own recorded progress has caught up to our
    /// own WAL's current end. Every public read/write op calls this first.
    fn run_log_till_end(&mut self) -> Result<()> {
        let inputs = self.build_inputs();
        let result = runner::run_log(inputs, &self.machine_id, &mut self.store)?;
        self.progress = result;

        let own_offset = self.own_wal.offset()?;
        let recorded = self
            .progress
            .get(&self.machine_id)
            .map(|p| p.offset)
            .unwrap_or(0);
        if recorded != own_offset {
            log::warn!(
                "participant {}: log not settled (recorded offset {recorded} != own wal offset {own_offset})",
                self.machine_id
            );
            return Err(Error::LogNotSettled);
        }
        Ok(())
    }

    fn visible_leaves(&self, key: &str) -> Vec<DBRecord> {
        self.store
            .get_by_key(key)
            .into_iter()
            .filter(DBRecord::visible)
            .collect()
    }

    pub fn save(&mut self, key: impl Into<Key>, value: impl Into<String>) -> Result<()> {
        self.run_log_till_end()?;
        let key = key.into();
        let value = value.into();
        let leaves = self.visible_leaves(&key);

        let op = if leaves.is_empty() {
            LogOperation::root(
                forestkv_core::Op::Modify,
                key,
                value,
                self.machine_id.clone(),
            )
        } else {
            let main = Value::from(leaves, &self.machine_id)?.main().clone();
            let mut changes = main.machine_change_count.clone();
            *changes.entry(self.machine_id.clone()).or_insert(0) += 1;
            LogOperation::follow_up(
                forestkv_core::Op::Modify,
                key,
                value,
                self.machine_id.clone(),
                main.current_log_gid.clone(),
                main.value.clone(),
                main.machine_id.clone(),
                main.num,
                main.seq + 1,
                changes,
            )
        };

        self.own_wal.append(vec![LogOperationHandle::new(op)])?;
        Ok(())
    }

    pub fn del(&mut self, key: impl Into<Key>) -> Result<()> {
        self.run_log_till_end()?;
        let key = key.into();
        let leaves = self.visible_leaves(&key);
        if leaves.is_empty() {
            return Ok(());
        }

        let main = Value::from(leaves, &self.machine_id)?.main().clone();
        let mut changes = main.machine_change_count.clone();
        *changes.entry(self.machine_id.clone()).or_insert(0) += 1;
        let op = LogOperation::follow_up(
            forestkv_core::Op::Del,
            key,
            String::new(),
            self.machine_id.clone(),
            main.current_log_gid.clone(),
            main.value.clone(),
            main.machine_id.clone(),
            main.num,
            main.seq + 1,
            changes,
        );

        self.own_wal.append(vec![LogOperationHandle::new(op)])?;
        Ok(())
    }

    pub fn has(&mut self, key: &str) -> Result<bool> {
        self.run_log_till_end()?;
        Ok(!self.visible_leaves(key).is_empty())
    }

    pub fn load(&mut self, key: &str) -> Result<Value> {
        self.run_log_till_end()?;
        let leaves = self.visible_leaves(key);
        if leaves.is_empty() {
            return Err(Error::NotFound(key.to_string()));
        }
        Value::from(leaves, &self.machine_id)
    }

    pub fn all(&mut self) -> Result<Vec<Value>> {
        self.run_log_till_end()?;
        let mut by_key: HashMap<Key, Vec<DBRecord>> = HashMap::new();
        for record in self.store.all_nodes() {
            if record.visible() {
                by_key.entry(record.key.clone()).or_default().push(record);
            }
        }

        let mut values = Vec::with_capacity(by_key.len());
        for (_, records) in by_key {
            values.push(Value::from(records, &self.machine_id)?);
        }
        Ok(values)
    }

    /// Resolves a conflicting key by keeping `value.versions()[seq]` and
    /// discarding every other version as a single atomic WAL entry.
    pub fn accept(&mut self, value: &Value, seq: usize) -> Result<()> {
        self.run_log_till_end()?;
        if value.branches().is_empty() {
            return Err(Error::NotInConflict);
        }
        if !value.valid_seq(seq) {
            return Err(Error::InvalidSeq(seq));
        }

        let mut ops = Vec::new();
        for (i, version) in value.versions().iter().enumerate() {
            if i == seq {
                continue;
            }
            let mut changes = version.machine_change_count.clone();
            *changes.entry(self.machine_id.clone()).or_insert(0) += 1;
            ops.push(LogOperationHandle::new(LogOperation::follow_up(
                forestkv_core::Op::Discard,
                version.key.clone(),
                String::new(),
                self.machine_id.clone(),
                version.current_log_gid.clone(),
                version.value.clone(),
                version.machine_id.clone(),
                version.num,
                version.seq + 1,
                changes,
            )));
        }

        if ops.is_empty() {
            return Ok(());
        }
        self.own_wal.append(ops)?;
        Ok(())
    }

    pub fn all_conflicts(&mut self) -> Result<Vec<Value>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|v| !v.branches().is_empty())
            .collect())
    }

    /// Closes our WAL, then persists the node store into the relational
    /// snapshot by running a fresh runner pass against it (starting from
    /// the snapshot's own last-recorded progress, not our in-memory one),
    /// so a crash between this and the next `init` still catches up
    /// correctly from the WALs alone.
    pub fn close(mut self) -> Result<()> {
        self.own_wal.close()?;

        let path = db_path(&self.working_dir, &self.machine_id);
        let mut snapshot = SnapshotStore::load(&path)?;

        let mut progress = HashMap::new();
        for p in snapshot.processes() {
            progress.insert(
                p.machine_id.clone(),
                LogProcess {
                    offset: p.offset,
                    num: p.num,
                    gid: p.gid,
                },
            );
        }

        let mut inputs = Vec::with_capacity(self.peers.len());
        for peer in &self.peers {
            let p = progress.get(peer).cloned().unwrap_or(LogProcess {
                offset: HEADER_SIZE,
                num: 0,
                gid: Gid::empty(),
            });
            inputs.push(LogInput {
                machine_id: peer.clone(),
                path: wal_path(&self.working_dir, peer),
                format: self.config.log_format.new_format(),
                progress: p,
            });
        }

        if !inputs.is_empty() {
            runner::run_log(inputs, &self.machine_id, &mut snapshot)?;
        }
        snapshot.persist(&path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn s1_single_participant_crud() {
        let dir = TempDir::new().unwrap();
        let mut p = Participant::init(dir.path(), "m0").unwrap();

        p.save("k", "v1").unwrap();
        assert_eq!(p.load("k").unwrap().main().value, "v1");

        p.save("k", "v2").unwrap();
        assert_eq!(p.load("k").unwrap().main().value, "v2");

        p.del("k").unwrap();
        assert!(!p.has("k").unwrap());
    }

    #[test]
    fn s2_recovery_after_snapshot_deletion() {
        let dir = TempDir::new().unwrap();
        {
            let mut p = Participant::init(dir.path(), "m0").unwrap();
            p.save("k", "v1").unwrap();
            p.save("k", "v2").unwrap();
            p.del("k").unwrap();
            p.close().unwrap();
        }

        std::fs::remove_file(dir.path().join("m0").join(DB_FILE_NAME)).ok();

        let mut p = Participant::init(dir.path(), "m0").unwrap();
        assert!(!p.has("k").unwrap());
        assert!(p.all().unwrap().is_empty());
    }

    #[test]
    fn s3_conflicting_update_and_accept() {
        let dir = TempDir::new().unwrap();

        let mut a = Participant::init(dir.path(), "A").unwrap();
        a.save("k", "A1").unwrap();
        a.close().unwrap();

        let mut b = Participant::init(dir.path(), "B").unwrap();
        b.save("k", "B1").unwrap();

        let value = b.load("k").unwrap();
        assert_eq!(value.main().machine_id, "B");
        assert_eq!(value.branches().len(), 1);

        b.accept(&value, 0).unwrap();
        let resolved = b.load("k").unwrap();
        assert!(resolved.branches().is_empty());
        assert_eq!(resolved.main().value, "B1");
    }

    #[test]
    fn s6_accept_with_invalid_seq_appends_nothing() {
        let dir = TempDir::new().unwrap();
        let mut a = Participant::init(dir.path(), "A").unwrap();
        a.save("k", "A1").unwrap();
        a.close().unwrap();

        let mut b = Participant::init(dir.path(), "B").unwrap();
        b.save("k", "B1").unwrap();
        let value = b.load("k").unwrap();

        let err = b.accept(&value, 7).unwrap_err();
        assert!(matches!(err, Error::InvalidSeq(7)));

        // Nothing was appended: still in conflict.
        let still = b.load("k").unwrap();
        assert_eq!(still.branches().len(), 1);
    }
}
