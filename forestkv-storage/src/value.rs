//! Value / version selection (C6): picks a single "main" version among a
//! key's visible leaves and exposes the rest as numbered conflict branches.

use crate::node_store::DBRecord;
use forestkv_core::{Error, Result};
use std::cmp::Ordering;

/// The result of applying main/branch selection to one key's visible
/// leaves. `versions()[0]` is always the main version.
#[derive(Debug, Clone)]
pub struct Value {
    versions: Vec<DBRecord>,
}

impl Value {
    /// Selects `main = argmax cmp(r, local)` over `leaves`, tie-broken by
    /// `changes(local)` desc, then `seq` desc, then `machine_id` desc.
    /// Remaining leaves become `branches`, numbered `1..len` in encounter
    /// order. Fails with [`Error::NoMain`] if `leaves` is empty.
    pub fn from(leaves: Vec<DBRecord>, local_machine_id: &str) -> Result<Self> {
        if leaves.is_empty() {
            return Err(Error::NoMain);
        }

        let mut best_idx = 0;
        for (i, candidate) in leaves.iter().enumerate().skip(1) {
            if cmp(candidate, &leaves[best_idx], local_machine_id) == Ordering::Greater {
                best_idx = i;
            }
        }

        let mut versions = leaves;
        versions.swap(0, best_idx);
        Ok(Self { versions })
    }

    pub fn main(&self) -> &DBRecord {
        &self.versions[0]
    }

    /// Branches, numbered `1..=len` matching `versions()[i]` for `i >= 1`.
    pub fn branches(&self) -> &[DBRecord] {
        &self.versions[1..]
    }

    /// `[main, branches…]`; `versions()[0]` is the main version.
    pub fn versions(&self) -> &[DBRecord] {
        &self.versions
    }

    /// `true` iff `seq` is a valid index into [`Value::versions`].
    pub fn valid_seq(&self, seq: usize) -> bool {
        seq < self.versions.len()
    }
}

/// Total order used to pick `main`: higher is more preferred.
///
/// Ties broken by `changes(local)` desc, then `seq` desc, then `machine_id`
/// desc (lexicographic on the string).
fn cmp(a: &DBRecord, b: &DBRecord, local_machine_id: &str) -> Ordering {
    a.changes(local_machine_id)
        .cmp(&b.changes(local_machine_id))
        .then(a.seq.cmp(&b.seq))
        .then(a.machine_id.cmp(&b.machine_id))
}
