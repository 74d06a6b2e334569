//! In-memory multi-index node store (C4): the arena of [`DBRecord`]s every
//! participant replays its and its peers' WALs into.

pub mod snapshot;

use forestkv_core::{Error, Gid, Key, MachineId, Result, Val};
use std::collections::HashMap;

/// The current state of one causal leaf for a key.
///
/// Replaced, never mutated, on every follow-up operation — the store never
/// holds both a parent and its child for the same lineage at once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DBRecord {
    pub current_log_gid: Gid,

    pub key: Key,
    pub value: Val,
    pub is_deleted: bool,
    pub is_discarded: bool,

    pub prev_log_gid: Gid,
    pub prev_machine_id: MachineId,
    pub prev_num: i64,
    pub seq: u64,

    pub machine_id: MachineId,
    pub offset: u64,
    pub num: i64,

    pub machine_change_count: HashMap<MachineId, i32>,
}

impl DBRecord {
    /// `!is_deleted && !is_discarded` — the only lens under which a key is
    /// observable to users.
    pub fn visible(&self) -> bool {
        !self.is_deleted && !self.is_discarded
    }

    /// `machine_change_count[m]`, or `0` if `m` never contributed a change
    /// to this lineage.
    pub fn changes(&self, machine_id: &str) -> i32 {
        self.machine_change_count.get(machine_id).copied().unwrap_or(0)
    }

    /// `prev_num == 0` — equivalently `seq == 0` and `prev_log_gid` empty.
    pub fn is_root(&self) -> bool {
        self.prev_num == 0
    }
}

/// Read-only half of the node store contract — what [`DBRecord::visible`]
/// callers and `merge` sources need.
pub trait ReadOnlyNodeStore {
    fn get_by_key(&self, key: &str) -> Vec<DBRecord>;
    fn get_by_gid(&self, gid: &Gid) -> Option<DBRecord>;
    fn all_nodes(&self) -> Vec<DBRecord>;
}

/// Full node store contract: three indices (by key, by gid, insertion
/// order) kept consistent across `add`/`replace`.
pub trait NodeStore: ReadOnlyNodeStore {
    fn add(&mut self, record: DBRecord) -> Result<()>;
    fn replace(&mut self, old_gid: &Gid, new: DBRecord) -> Result<()>;
    fn merge(&mut self, other: &dyn ReadOnlyNodeStore) -> Result<()> {
        for record in other.all_nodes() {
            // Idempotent merge: gid collisions are silently ignored rather
            // than surfaced, since the whole point of merging is to fold in
            // state that may already be present.
            let _ = self.add(record);
        }
        Ok(())
    }
}

/// Arena-by-gid node store with a key index and insertion-order list,
/// matching the indexing the log runner and value-selection layer need:
/// `get_by_key` and `all_nodes` are the only non-O(1) operations.
#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    arena: HashMap<Gid, DBRecord>,
    key_index: HashMap<Key, Vec<Gid>>,
    insertion_order: Vec<Gid>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_indices(&mut self, gid: Gid, key: &str) {
        self.key_index.entry(key.to_string()).or_default().push(gid.clone());
        self.insertion_order.push(gid);
    }

    fn remove_indices(&mut self, gid: &Gid, key: &str) {
        if let Some(v) = self.key_index.get_mut(key) {
            v.retain(|g| g != gid);
            if v.is_empty() {
                self.key_index.remove(key);
            }
        }
        self.insertion_order.retain(|g| g != gid);
    }
}

impl ReadOnlyNodeStore for InMemoryNodeStore {
    fn get_by_key(&self, key: &str) -> Vec<DBRecord> {
        match self.key_index.get(key) {
            None => Vec::new(),
            Some(gids) => gids
                .iter()
                .filter_map(|g| self.arena.get(g).cloned())
                .collect(),
        }
    }

    fn get_by_gid(&self, gid: &Gid) -> Option<DBRecord> {
        self.arena.get(gid).cloned()
    }

    fn all_nodes(&self) -> Vec<DBRecord> {
        self.insertion_order
            .iter()
            .filter_map(|g| self.arena.get(g).cloned())
            .collect()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn add(&mut self, record: DBRecord) -> Result<()> {
        if self.arena.contains_key(&record.current_log_gid) {
            return Err(Error::NodeExists(record.current_log_gid.to_string()));
        }
        let gid = record.current_log_gid.clone();
        let key = record.key.clone();
        self.arena.insert(gid.clone(), record);
        self.insert_indices(gid, &key);
        Ok(())
    }

    fn replace(&mut self, old_gid: &Gid, new: DBRecord) -> Result<()> {
        let old = self
            .arena
            .get(old_gid)
            .ok_or_else(|| Error::NotFound(old_gid.to_string()))?;
        if old.key != new.key {
            return Err(Error::KeyMismatch {
                old: old.key.clone(),
                new: new.key.clone(),
            });
        }
        if self.arena.contains_key(&new.current_log_gid) {
            return Err(Error::NodeExists(new.current_log_gid.to_string()));
        }

        let key = old.key.clone();
        let new_gid = new.current_log_gid.clone();
        self.arena.insert(new_gid.clone(), new);
        self.insert_indices(new_gid, &key);
        self.arena.remove(old_gid);
        self.remove_indices(old_gid, &key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_record(key: &str, gid: &str, machine: &str) -> DBRecord {
        let mut changes = HashMap::new();
        changes.insert(machine.to_string(), 1);
        DBRecord {
            current_log_gid: gid.into(),
            key: key.into(),
            value: "v".into(),
            is_deleted: false,
            is_discarded: false,
            prev_log_gid: Gid::empty(),
            prev_machine_id: String::new(),
            prev_num: 0,
            seq: 0,
            machine_id: machine.into(),
            offset: 256,
            num: 1,
            machine_change_count: changes,
        }
    }

    #[test]
    fn add_then_get_by_key_and_gid() {
        let mut store = InMemoryNodeStore::new();
        store.add(root_record("k", "g1", "m0")).unwrap();

        assert_eq!(store.get_by_key("k").len(), 1);
        assert!(store.get_by_gid(&"g1".into()).is_some());
    }

    #[test]
    fn add_duplicate_gid_fails() {
        let mut store = InMemoryNodeStore::new();
        store.add(root_record("k", "g1", "m0")).unwrap();
        let err = store.add(root_record("k", "g1", "m0")).unwrap_err();
        assert!(matches!(err, Error::NodeExists(_)));
    }

    #[test]
    fn replace_swaps_leaf_atomically() {
        let mut store = InMemoryNodeStore::new();
        store.add(root_record("k", "g1", "m0")).unwrap();

        let mut child = root_record("k", "g2", "m0");
        child.prev_log_gid = "g1".into();
        child.prev_num = 1;
        child.seq = 1;

        store.replace(&"g1".into(), child).unwrap();

        assert!(store.get_by_gid(&"g1".into()).is_none());
        assert_eq!(store.get_by_key("k").len(), 1);
        assert_eq!(store.get_by_key("k")[0].current_log_gid, Gid::from("g2"));
    }

    #[test]
    fn replace_with_mismatched_key_fails() {
        let mut store = InMemoryNodeStore::new();
        store.add(root_record("k1", "g1", "m0")).unwrap();
        let other_key = root_record("k2", "g2", "m0");
        let err = store.replace(&"g1".into(), other_key).unwrap_err();
        assert!(matches!(err, Error::KeyMismatch { .. }));
    }

    #[test]
    fn merge_is_idempotent_on_gid_collisions() {
        let mut a = InMemoryNodeStore::new();
        a.add(root_record("k", "g1", "m0")).unwrap();

        let mut b = InMemoryNodeStore::new();
        b.add(root_record("k", "g1", "m0")).unwrap();
        b.add(root_record("k", "g2", "m0")).unwrap();

        a.merge(&b).unwrap();
        assert_eq!(a.all_nodes().len(), 2);
    }
}
