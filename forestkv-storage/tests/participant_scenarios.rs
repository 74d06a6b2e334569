//! Participant-level scenarios S4 and S5. S1/S2/S3/S6 live alongside the
//! façade in `src/participant.rs`; these two need either a third participant
//! or direct WAL-file surgery, so they're easier to express at arm's length.

use forestkv_core::Error;
use forestkv_storage::Participant;
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;

/// S4 — chain across participants: A and B alternate building a causal
/// chain on the same key; a third participant C, which never writes,
/// ingests both WALs and must see exactly one leaf — the tip of the chain —
/// with every intermediate record replaced.
///
/// This also pins down Open Question 1: a non-root op whose parent isn't
/// present locally is adopted unconditionally (not only when
/// `prev_machine_id` equals the local participant), because that's exactly
/// what's needed here for C to ever see B's "v2" step, whose parent (A's
/// "v1") it only learns about by reading A's own WAL via the same runner
/// pass.
#[test]
fn s4_chain_across_participants_collapses_to_one_leaf() {
    let dir = TempDir::new().unwrap();

    let mut a = Participant::init(dir.path(), "A").unwrap();
    a.save("k", "v1").unwrap();
    a.close().unwrap();

    let mut b = Participant::init(dir.path(), "B").unwrap();
    assert_eq!(b.load("k").unwrap().main().value, "v1");
    b.save("k", "v2").unwrap();
    b.close().unwrap();

    let mut a = Participant::init(dir.path(), "A").unwrap();
    assert_eq!(a.load("k").unwrap().main().value, "v2");
    a.save("k", "v3").unwrap();
    a.close().unwrap();

    let mut c = Participant::init(dir.path(), "C").unwrap();
    let value = c.load("k").unwrap();
    assert_eq!(value.main().value, "v3");
    assert!(value.branches().is_empty());
}

/// S5 — partial write: truncating the trailing CRC bytes of a committed
/// entry must surface as `CorruptEntry` on the next read, without touching
/// the file header — the writer's recorded `file_end`/`entry_num` are still
/// valid for anything written *before* the corrupted entry.
///
/// The participant here is deliberately never `close()`d: closing persists
/// a snapshot whose recorded progress sits past the entry we're about to
/// corrupt, and a participant reopened from that snapshot would resume
/// reading *after* the corruption rather than scan over it. With
/// `write_flush_threshold == 1` (the default), the single `save` below is
/// flushed to disk on its own, so dropping `p` without closing still leaves
/// a durable, corruptible entry and no snapshot file — the next `init` has
/// no recorded progress for "m0" and must scan its WAL from the header
/// forward, straight through the corrupted entry.
#[test]
fn s5_truncated_crc_is_reported_as_corrupt_entry() {
    let dir = TempDir::new().unwrap();
    {
        let mut p = Participant::init(dir.path(), "m0").unwrap();
        p.save("k", "v1").unwrap();
    }

    let wal_path = dir.path().join("m0").join("0.wal");
    let len = std::fs::metadata(&wal_path).unwrap().len();
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&wal_path)
        .unwrap();
    file.set_len(len - 2).unwrap();
    file.seek(SeekFrom::End(0)).unwrap();
    file.write_all(&[0u8; 2]).unwrap();
    drop(file);

    // No `0.db` snapshot exists, so this participant has no recorded
    // progress for "m0" and must scan its WAL from the header, reaching the
    // corrupted entry on the very first read/write op.
    let mut p = Participant::init(dir.path(), "m0").unwrap();
    let err = p.has("k").unwrap_err();
    assert!(matches!(err, Error::CorruptEntry { .. }));
}
