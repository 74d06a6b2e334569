//! ForestKV: a multi-writer replicated key-value store.
//!
//! Every independent participant maintains its own append-only
//! write-ahead log and a derived index of currently-leaf key states,
//! obtained by replaying its own log together with its peers'. Writes
//! never coordinate — each participant only ever appends to its own log —
//! and consistency is achieved lazily, by replaying new entries on every
//! query.
//!
//! This crate re-exports the public façade; the implementation lives in
//! [`forestkv_storage`] (log format, WAL, node store, log runner, version
//! selection, participant) and [`forestkv_core`] (shared errors and ids).

pub use forestkv_core::{Error, Gid, MachineId, Op, Result};
pub use forestkv_storage::{LogFormatKind, Participant, ParticipantConfig, Value};
