//! Error types shared by every ForestKV crate.

use thiserror::Error;

/// The result type used throughout ForestKV.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the log format, WAL, node store, log
/// runner, or participant layers.
///
/// Variants map directly onto the error kinds of the design: most are
/// surfaced to the caller as-is, a few (`NodeExists`, `NotFound`,
/// `KeyMismatch`) are treated by the log runner as "this operation is
/// blocked, try again later" rather than fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying file system failure (open/read/write/seek/fsync).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is too short to contain a header, or a header failed to
    /// parse, and the caller opened it read-only so no header could be
    /// initialized.
    #[error("invalid file: {0}")]
    InvalidFile(String),

    /// CRC mismatch or framing underflow while reading an entry. Iteration
    /// stops at the offset where this was detected; on-disk state is never
    /// mutated in response.
    #[error("corrupt log entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    /// The WAL failed to rewrite its header after a successful body append.
    /// The WAL instance is marked broken and refuses further writes until
    /// reopened.
    #[error("wal is broken: {0}")]
    Broken(String),

    /// A node store `add` targeted a gid that is already present.
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// A node store `replace`/`get_by_gid` targeted a gid that isn't present,
    /// or a requested key has no visible leaves.
    #[error("not found: {0}")]
    NotFound(String),

    /// A node store `replace` was attempted across two records with
    /// different keys.
    #[error("key mismatch: old key {old:?}, new key {new:?}")]
    KeyMismatch { old: String, new: String },

    /// `run_log_till_end` returned before our own recorded offset caught up
    /// to our own WAL's `file_end`; the write that triggered it was not
    /// appended.
    #[error("log not settled: local progress has not reached the end of our own wal")]
    LogNotSettled,

    /// `Value::from` was called with an empty leaf set.
    #[error("no main version: leaf set is empty")]
    NoMain,

    /// `accept` was called with a seq number outside `0..versions.len()`.
    #[error("invalid seq: {0}")]
    InvalidSeq(usize),

    /// `accept` was called on a key with no conflict branches.
    #[error("key is not in a conflict state")]
    NotInConflict,

    /// The log runner was given zero inputs.
    #[error("empty input: log runner needs at least one log source")]
    EmptyInput,

    /// A record or entry could not be (de)serialized.
    #[error("encoding error: {0}")]
    Encoding(String),
}
