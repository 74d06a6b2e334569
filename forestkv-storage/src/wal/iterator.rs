//! Offset- and gid-based iteration over a WAL file, independent of any
//! writer that might still be appending to it.

use crate::format::{LogFormat, LogOperation, HEADER_SIZE};
use crate::io::LogFile;
use forestkv_core::{Error, Gid, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Yields one [`LogOperation`] at a time while preserving per-entry
/// grouping (every op of one frame is yielded before the next frame is
/// read). Each item carries the byte offset immediately following the
/// entry that contained it — the resumable checkpoint a caller should save
/// as its progress.
pub struct WalIterator {
    file: LogFile,
    format: Box<dyn LogFormat>,
    /// Byte offset the next `read_entry` call will start from.
    next_entry_offset: u64,
    /// Upper bound captured at iterator creation (the WAL's `file_end` at
    /// that moment); never observes a concurrent writer's partial append.
    scan_end: u64,
    pending: VecDeque<(LogOperation, u64)>,
    end_gid: Option<(Gid, bool)>,
    stopped: bool,
}

impl WalIterator {
    /// Starts scanning from `max(byte_offset, HEADER_SIZE)`.
    pub fn open(
        path: impl AsRef<Path>,
        format: Box<dyn LogFormat>,
        byte_offset: u64,
    ) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut file = LogFile::open_read_only(&path)?;
        let scan_end = format.read_header(&mut file)?.file_end as u64;

        Ok(Self {
            file,
            format,
            next_entry_offset: byte_offset.max(HEADER_SIZE),
            scan_end,
            pending: VecDeque::new(),
            end_gid: None,
            stopped: false,
        })
    }

    /// Locates the entry containing `gid` and resumes after it (or, if
    /// `inclusive`, at its start so the target op is re-yielded).
    pub fn from_gid(
        path: impl AsRef<Path>,
        format: Box<dyn LogFormat>,
        gid: &Gid,
        inclusive: bool,
    ) -> Result<Self> {
        let mut it = Self::open(&path, format, HEADER_SIZE)?;
        loop {
            let entry_start = it.next_entry_offset;
            if entry_start >= it.scan_end {
                return Err(Error::NotFound(format!("gid {gid} not found in wal")));
            }
            let (entry, consumed) = it.format.read_entry(&mut it.file, entry_start)?;
            let entry_end = entry_start + consumed;
            if entry.ops.iter().any(|op| &op.gid == gid) {
                it.next_entry_offset = if inclusive { entry_start } else { entry_end };
                return Ok(it);
            }
            it.next_entry_offset = entry_end;
        }
    }

    pub fn set_end_gid(&mut self, gid: Gid, inclusive: bool) {
        self.end_gid = Some((gid, inclusive));
    }

    fn fill_pending(&mut self) -> Result<bool> {
        if self.next_entry_offset >= self.scan_end {
            return Ok(false);
        }
        let (entry, consumed) = self
            .format
            .read_entry(&mut self.file, self.next_entry_offset)?;
        let checkpoint = self.next_entry_offset + consumed;
        self.next_entry_offset = checkpoint;
        for op in entry.ops {
            self.pending.push_back((op, checkpoint));
        }
        Ok(true)
    }
}

impl Iterator for WalIterator {
    type Item = Result<(LogOperation, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        loop {
            if let Some((op, checkpoint)) = self.pending.pop_front() {
                if let Some((end_gid, include_end)) = &self.end_gid {
                    if &op.gid == end_gid {
                        self.stopped = true;
                        return if *include_end {
                            Some(Ok((op, checkpoint)))
                        } else {
                            None
                        };
                    }
                }
                return Some(Ok((op, checkpoint)));
            }
            match self.fill_pending() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.stopped = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::binary::BinaryFormat;
    use crate::wal::{LogOperationHandle, Wal};
    use forestkv_core::Op;
    use tempfile::TempDir;

    fn op(key: &str, value: &str) -> LogOperationHandle {
        LogOperationHandle::new(crate::format::LogOperation::root(
            Op::Modify,
            key.into(),
            value.into(),
            "m0".into(),
        ))
    }

    #[test]
    fn offset_iterator_yields_all_ops_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.wal");
        let mut wal = Wal::open(&path, Box::new(BinaryFormat), false).unwrap();
        wal.append(vec![op("k1", "v1")]).unwrap();
        wal.append(vec![op("k2", "v2")]).unwrap();
        wal.flush().unwrap();

        let it = wal.iterator_offset(0).unwrap();
        let ops: Vec<_> = it.map(|r| r.unwrap().0.key).collect();
        assert_eq!(ops, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn from_gid_resumes_after_target_by_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.wal");
        let mut wal = Wal::open(&path, Box::new(BinaryFormat), false).unwrap();
        let (gid1, _) = wal.append(vec![op("k1", "v1")]).unwrap();
        wal.append(vec![op("k2", "v2")]).unwrap();
        wal.flush().unwrap();

        let it = wal.iterator_from(&gid1, false).unwrap();
        let ops: Vec<_> = it.map(|r| r.unwrap().0.key).collect();
        assert_eq!(ops, vec!["k2".to_string()]);
    }
}
