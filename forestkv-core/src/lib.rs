//! Shared types used by `forestkv-storage`: errors and identifiers.
//!
//! Kept in their own crate, following the same split the rest of the
//! workspace uses, so that downstream consumers of the wire format (a
//! hypothetical CLI or sync tool) don't need to pull in the storage engine
//! itself just to talk about gids and errors.

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::{Gid, MachineId};

/// A key in the shared namespace. Kept as an owned `String` rather than
/// `Vec<u8>`: every operation in this system is user/operator-facing text,
/// never opaque binary data.
pub type Key = String;

/// A value associated with a key. Empty for `Del`/`Discard` operations.
pub type Val = String;

/// The kind of mutation a `LogOperation` represents.
///
/// `None` is reserved and must never appear on disk; it exists only as the
/// zero value so that a corrupt/short read can be distinguished from a
/// legitimately-decoded operation before validation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum Op {
    #[default]
    None = 0,
    Modify = 1,
    Del = 2,
    Discard = 3,
}

impl Op {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Op::None),
            1 => Some(Op::Modify),
            2 => Some(Op::Del),
            3 => Some(Op::Discard),
            _ => None,
        }
    }
}
