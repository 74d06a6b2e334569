//! Identifiers used across the log format, WAL, and node store.

use rand::RngCore;
use std::fmt;

/// A stable, human-chosen name for a participant. Just a string: the
/// working-directory layout (`<wd>/<machine_id>/0.wal`) is what gives it
/// meaning.
pub type MachineId = String;

/// A random 128-bit identifier assigned to every operation at WAL append
/// time, rendered as 36-char dashed lowercase hex (`8-4-4-4-12`).
///
/// Collisions are treated as impossible in practice; if one ever happened it
/// would surface deterministically as `NodeExists` at node-store insert
/// time rather than as silent corruption.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Gid(String);

impl Gid {
    /// Generates a fresh random gid from a cryptographic RNG.
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(format_dashed_hex(&bytes))
    }

    /// The empty gid, used to mean "no parent" (`prev_gid` on a root op).
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Gid {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for Gid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Gid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn format_dashed_hex(bytes: &[u8; 16]) -> String {
    let mut s = String::with_capacity(36);
    for (i, group_len) in [4, 2, 2, 2, 6].iter().enumerate() {
        if i > 0 {
            s.push('-');
        }
        let start: usize = [0, 4, 6, 8, 10][i];
        for b in &bytes[start..start + group_len] {
            s.push_str(&format!("{:02x}", b));
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_gid_has_dashed_hex_shape() {
        let gid = Gid::new();
        let s = gid.as_str();
        assert_eq!(s.len(), 36);
        let parts: Vec<&str> = s.split('-').collect();
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![
            8, 4, 4, 4, 12
        ]);
        assert!(s.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn new_gids_are_distinct() {
        let a = Gid::new();
        let b = Gid::new();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_gid_round_trips_through_is_empty() {
        let g = Gid::empty();
        assert!(g.is_empty());
        assert_eq!(g.as_str(), "");
    }
}
