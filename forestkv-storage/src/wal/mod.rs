//! Durable append-only WAL (C3): opens a [`crate::format::LogFormat`] over a
//! file, assigns `(gid, num)` to appended operations, and exposes
//! offset/gid-based iteration for the log runner.

mod iterator;

pub use iterator::WalIterator;

use crate::format::{EntryPos, FileHeader, LogEntry, LogFormat, HEADER_SIZE};
use crate::io::LogFile;
use forestkv_core::{Error, Gid, Result};
use std::path::{Path, PathBuf};

/// A single participant's write-ahead log.
///
/// `Wal` owns one open file handle. Once [`Wal::append`] fails to rewrite
/// the header after a successful body write, the instance is marked
/// [`Wal::broken`] and every further mutating call fails until the caller
/// reopens the file.
pub struct Wal {
    file: LogFile,
    format: Box<dyn LogFormat>,
    path: PathBuf,
    header: FileHeader,
    pos: u64,
    broken: bool,
    read_only: bool,
}

impl Wal {
    /// Opens (or initializes) the WAL at `path`.
    ///
    /// A file shorter than [`HEADER_SIZE`] is invalid: opened read-only this
    /// fails with [`Error::InvalidFile`]; opened read-write a fresh header
    /// is generated and written.
    pub fn open(path: impl AsRef<Path>, format: Box<dyn LogFormat>, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = if read_only {
            LogFile::open_read_only(&path)?
        } else {
            LogFile::open_read_write(&path)?
        };

        let valid = format.is_valid_file(&mut file)?;
        let header = if valid {
            format.read_header(&mut file)?
        } else if read_only {
            return Err(Error::InvalidFile(format!(
                "{} is shorter than the {}-byte header region",
                path.display(),
                HEADER_SIZE
            )));
        } else {
            let header = FileHeader::fresh(Gid::new().as_str().to_string());
            format.write_header(&mut file, &header)?;
            header
        };

        let pos = header.file_end as u64;
        log::debug!(
            "wal opened at {} (file_id={}, file_end={}, entry_num={})",
            path.display(),
            header.file_id,
            header.file_end,
            header.entry_num
        );

        Ok(Self {
            file,
            format,
            path,
            header,
            pos,
            broken: false,
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.pos
    }

    pub fn entry_num(&self) -> i64 {
        self.header.entry_num
    }

    pub fn file_id(&self) -> &str {
        &self.header.file_id
    }

    pub fn broken(&self) -> bool {
        self.broken
    }

    fn ensure_writable(&self, ops_len: usize) -> Result<()> {
        if self.broken {
            return Err(Error::Broken(format!(
                "wal at {} is broken and must be reopened",
                self.path.display()
            )));
        }
        if self.read_only {
            return Err(Error::InvalidFile(format!(
                "wal at {} is open read-only",
                self.path.display()
            )));
        }
        if ops_len == 0 {
            return Err(Error::EmptyInput);
        }
        Ok(())
    }

    /// Appends `ops` as one atomic entry, assigning fresh `gid`/`num` to
    /// each. Returns the last op's `(gid, num)`.
    pub fn append(&mut self, mut ops: Vec<LogOperationHandle>) -> Result<(Gid, i64)> {
        self.ensure_writable(ops.len())?;

        let base_num = self.header.entry_num;
        for (i, op) in ops.iter_mut().enumerate() {
            op.set_gid(Gid::new());
            op.set_num(base_num + i as i64 + 1);
        }
        self.append_raw_inner(ops)
    }

    /// Appends `ops` unchanged — `gid`/`num` are taken as given. Used only
    /// by format converters replaying another WAL's operations verbatim.
    pub fn append_raw(&mut self, ops: Vec<LogOperationHandle>) -> Result<(Gid, i64)> {
        self.ensure_writable(ops.len())?;
        self.append_raw_inner(ops)
    }

    fn append_raw_inner(&mut self, ops: Vec<LogOperationHandle>) -> Result<(Gid, i64)> {
        let entry = LogEntry {
            ops: ops.into_iter().map(|h| h.0).collect(),
        };
        let last = entry.ops.last().expect("ensure_writable rejects empty ops");
        let (last_gid, last_num) = (last.gid.clone(), last.num);

        let bytes_written =
            self.format
                .append_entry(&mut self.file, EntryPos::Offset(self.pos), &entry)?;
        let new_pos = self.pos + bytes_written;

        let new_header = FileHeader {
            file_id: self.header.file_id.clone(),
            file_end: new_pos as i64,
            last_entry_id: last_gid.clone(),
            entry_num: self.header.entry_num + entry.ops.len() as i64,
        };

        if let Err(e) = self.format.write_header(&mut self.file, &new_header) {
            self.broken = true;
            log::warn!("wal at {} failed to rewrite header: {e}", self.path.display());
            return Err(Error::Broken(e.to_string()));
        }

        self.header = new_header;
        self.pos = new_pos;
        log::debug!(
            "wal at {} appended {} op(s), last gid={} num={}",
            self.path.display(),
            entry.ops.len(),
            last_gid,
            last_num
        );
        Ok((last_gid, last_num))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.file.close()
    }

    /// An iterator starting at `max(byte_offset, HEADER_SIZE)`, scoped to
    /// this WAL's `file_end` as of now.
    pub fn iterator_offset(&self, byte_offset: u64) -> Result<WalIterator> {
        WalIterator::open(&self.path, self.format.clone_format(), byte_offset)
    }

    /// An iterator resuming after (or at) the entry containing `gid`.
    pub fn iterator_from(&self, gid: &Gid, inclusive: bool) -> Result<WalIterator> {
        WalIterator::from_gid(&self.path, self.format.clone_format(), gid, inclusive)
    }

    /// An iterator bounded by `[start_gid, end_gid]` (inclusivity per flag).
    pub fn range_iterator(
        &self,
        start_gid: &Gid,
        end_gid: &Gid,
        include_start: bool,
        include_end: bool,
    ) -> Result<WalIterator> {
        let mut it = self.iterator_from(start_gid, include_start)?;
        it.set_end_gid(end_gid.clone(), include_end);
        Ok(it)
    }
}

/// Newtype wrapper distinguishing "an op about to be appended" (gid/num not
/// yet assigned) from a fully-formed [`crate::format::LogOperation`]. Exists
/// purely to keep [`Wal::append`]'s contract ("I will assign these") distinct
/// at the type level from [`Wal::append_raw`]'s ("these are already final").
pub struct LogOperationHandle(pub crate::format::LogOperation);

impl LogOperationHandle {
    pub fn new(op: crate::format::LogOperation) -> Self {
        Self(op)
    }

    fn set_gid(&mut self, gid: Gid) {
        self.0.gid = gid;
    }

    fn set_num(&mut self, num: i64) {
        self.0.num = num;
    }
}

impl From<crate::format::LogOperation> for LogOperationHandle {
    fn from(op: crate::format::LogOperation) -> Self {
        Self::new(op)
    }
}
