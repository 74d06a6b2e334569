//! Canonical binary log format.
//!
//! Header region `[0..HEADER_SIZE)`: `u32 LE payload_len || payload ||
//! zero-pad`, where `payload` is a `bincode` encoding of [`FileHeader`] and
//! must fit in `HEADER_SIZE - 4` bytes.
//!
//! Each entry: `u32 LE body_len || body || u32 LE CRC32-IEEE(body)`, where
//! `body` is a `bincode` encoding of [`LogEntry`]. `body_len == 0` is a
//! legal, skippable empty entry (8 bytes on disk).

use super::{seek_to, EntryPos, FileHeader, LogEntry, LogFormat, HEADER_SIZE};
use crate::io::{LogFile, Whence};
use forestkv_core::{Error, Result};

/// Max bytes available to the header payload before the zero-pad region.
const HEADER_PAYLOAD_MAX: usize = HEADER_SIZE as usize - 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryFormat;

impl LogFormat for BinaryFormat {
    fn write_header(&self, f: &mut LogFile, header: &FileHeader) -> Result<()> {
        let payload = bincode::serialize(header).map_err(|e| Error::Encoding(e.to_string()))?;
        if payload.len() > HEADER_PAYLOAD_MAX {
            return Err(Error::InvalidFile(format!(
                "header payload of {} bytes exceeds max {}",
                payload.len(),
                HEADER_PAYLOAD_MAX
            )));
        }

        let mut buf = vec![0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        buf[4..4 + payload.len()].copy_from_slice(&payload);

        f.seek(0, Whence::Start)?;
        f.write_all(&buf)?;
        Ok(())
    }

    fn read_header(&self, f: &mut LogFile) -> Result<FileHeader> {
        f.seek(0, Whence::Start)?;
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        f.read_exact(&mut buf)?;

        let payload_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if payload_len > HEADER_PAYLOAD_MAX {
            return Err(Error::InvalidFile(format!(
                "header claims payload of {} bytes, max is {}",
                payload_len, HEADER_PAYLOAD_MAX
            )));
        }
        let payload = &buf[4..4 + payload_len];
        bincode::deserialize(payload).map_err(|e| Error::InvalidFile(e.to_string()))
    }

    fn append_entry(&self, f: &mut LogFile, pos: EntryPos, entry: &LogEntry) -> Result<u64> {
        if let EntryPos::Offset(off) = pos {
            if off < HEADER_SIZE {
                return Err(Error::InvalidFile(format!(
                    "append offset {} precedes header region",
                    off
                )));
            }
        }
        seek_to(f, pos)?;

        let body = bincode::serialize(entry).map_err(|e| Error::Encoding(e.to_string()))?;
        let crc = crc32fast::hash(&body);

        let mut buf = Vec::with_capacity(4 + body.len() + 4);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc.to_le_bytes());

        f.write_all(&buf)?;
        Ok(buf.len() as u64)
    }

    fn read_entry(&self, f: &mut LogFile, pos: u64) -> Result<(LogEntry, u64)> {
        f.seek(pos as i64, Whence::Start)?;

        let mut len_buf = [0u8; 4];
        f.read_exact(&mut len_buf)?;
        let body_len = u32::from_le_bytes(len_buf) as usize;

        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            f.read_exact(&mut body).map_err(|_| Error::CorruptEntry {
                offset: pos,
                reason: "truncated body".into(),
            })?;
        }

        let mut crc_buf = [0u8; 4];
        f.read_exact(&mut crc_buf).map_err(|_| Error::CorruptEntry {
            offset: pos,
            reason: "truncated crc".into(),
        })?;
        let stored_crc = u32::from_le_bytes(crc_buf);
        let actual_crc = crc32fast::hash(&body);
        if actual_crc != stored_crc {
            return Err(Error::CorruptEntry {
                offset: pos,
                reason: format!("crc mismatch: stored {stored_crc:#x}, computed {actual_crc:#x}"),
            });
        }

        let entry = if body_len == 0 {
            LogEntry::default()
        } else {
            bincode::deserialize(&body).map_err(|e| Error::CorruptEntry {
                offset: pos,
                reason: format!("decode failed: {e}"),
            })?
        };

        Ok((entry, 4 + body_len as u64 + 4))
    }

    fn clone_format(&self) -> Box<dyn LogFormat> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LogFile;
    use forestkv_core::{Gid, Op};
    use tempfile::TempDir;

    fn sample_entry() -> LogEntry {
        LogEntry {
            ops: vec![crate::format::LogOperation::root(
                Op::Modify,
                "k".into(),
                "v".into(),
                "m0".into(),
            )],
        }
    }

    #[test]
    fn header_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut f = LogFile::open_read_write(dir.path().join("f.log")).unwrap();
        let fmt = BinaryFormat;

        let header = FileHeader {
            file_id: "abc".into(),
            file_end: HEADER_SIZE as i64,
            last_entry_id: Gid::new(),
            entry_num: 0,
        };
        fmt.write_header(&mut f, &header).unwrap();
        let read_back = fmt.read_header(&mut f).unwrap();
        assert_eq!(header, read_back);
    }

    #[test]
    fn entry_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut f = LogFile::open_read_write(dir.path().join("f.log")).unwrap();
        let fmt = BinaryFormat;
        f.seek(HEADER_SIZE as i64, crate::io::Whence::Start).unwrap();

        let entry = sample_entry();
        let written = fmt
            .append_entry(&mut f, EntryPos::Offset(HEADER_SIZE), &entry)
            .unwrap();

        let (read_back, consumed) = fmt.read_entry(&mut f, HEADER_SIZE).unwrap();
        assert_eq!(entry, read_back);
        assert_eq!(written, consumed);
    }

    #[test]
    fn empty_body_entry_is_legal() {
        let dir = TempDir::new().unwrap();
        let mut f = LogFile::open_read_write(dir.path().join("f.log")).unwrap();
        let fmt = BinaryFormat;

        let entry = LogEntry::default();
        let written = fmt
            .append_entry(&mut f, EntryPos::Offset(HEADER_SIZE), &entry)
            .unwrap();
        assert_eq!(written, 8);

        let (read_back, _) = fmt.read_entry(&mut f, HEADER_SIZE).unwrap();
        assert_eq!(read_back.ops.len(), 0);
    }

    #[test]
    fn flipped_byte_in_body_is_detected_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.log");
        let mut f = LogFile::open_read_write(&path).unwrap();
        let fmt = BinaryFormat;

        let entry = sample_entry();
        fmt.append_entry(&mut f, EntryPos::Offset(HEADER_SIZE), &entry)
            .unwrap();
        f.close().unwrap();

        // Flip a byte inside the body region (just past the 4-byte length prefix).
        let mut bytes = std::fs::read(&path).unwrap();
        let flip_at = HEADER_SIZE as usize + 4;
        bytes[flip_at] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let mut f = LogFile::open_read_write(&path).unwrap();
        let err = fmt.read_entry(&mut f, HEADER_SIZE).unwrap_err();
        assert!(matches!(err, Error::CorruptEntry { .. }));
    }
}
