//! Scoped positional I/O over a single regular file (C1).
//!
//! Everything above this module talks to files only through [`LogFile`]:
//! positional `read`/`write`, `seek`, `flush` (fsync), and an idempotent
//! `close`. Short reads are possible and must be retried by callers that
//! need an exact number of bytes — the framing layer in [`crate::format`]
//! does this.

use forestkv_core::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Where a [`LogFile::seek`] measures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A single open file handle, opened either read-only or read-write.
///
/// `LogFile` owns the underlying `std::fs::File` and is not `Clone`; callers
/// that need to share access (the WAL, its iterators) do so by holding a
/// `&mut LogFile` or by re-opening the path.
pub struct LogFile {
    file: File,
    path: PathBuf,
    closed: bool,
}

impl LogFile {
    /// Opens `path` for reading and writing, creating it (and its parent
    /// directories) if it doesn't exist.
    pub fn open_read_write(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            closed: false,
        })
    }

    /// Opens `path` for reading only. Fails if the file doesn't exist.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(Self {
            file,
            path,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file on disk.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let pos = match whence {
            Whence::Start => SeekFrom::Start(offset as u64),
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        Ok(self.file.seek(pos)?)
    }

    /// Reads into `buf`, returning the number of bytes actually read. May
    /// return short (including zero at EOF) — see module docs.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    /// Reads until `buf` is completely filled or EOF is hit.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        Ok(self.file.read_exact(buf)?)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf)?)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Ok(self.file.write_all(buf)?)
    }

    /// Flushes buffered writes and fsyncs the file to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Idempotent: closing twice is a no-op. Rust's `File` closes on drop,
    /// so this mainly exists to let callers observe/force it explicitly and
    /// to match the rest of the corpus' explicit-close discipline.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush().ok();
        self.closed = true;
        Ok(())
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_read_write_creates_missing_file_and_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/file.log");

        let f = LogFile::open_read_write(&path).unwrap();
        assert!(path.exists());
        assert_eq!(f.len().unwrap(), 0);
    }

    #[test]
    fn open_read_only_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.log");
        assert!(LogFile::open_read_only(&path).is_err());
    }

    #[test]
    fn write_then_seek_start_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.log");
        let mut f = LogFile::open_read_write(&path).unwrap();

        f.write_all(b"hello world").unwrap();
        f.seek(0, Whence::Start).unwrap();

        let mut buf = [0u8; 5];
        f.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.log");
        let mut f = LogFile::open_read_write(&path).unwrap();
        f.close().unwrap();
        f.close().unwrap();
    }
}
