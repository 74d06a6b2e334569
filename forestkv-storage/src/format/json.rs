//! JSON log format: same semantics as [`super::binary::BinaryFormat`], meant
//! for human inspection and format-converter tooling rather than day-to-day
//! use.
//!
//! Header region: a JSON object, space-padded to `HEADER_SIZE - 1` bytes,
//! terminated by `\n`. Entries are newline-terminated JSON objects appended
//! after the header — no CRC framing, since the encoding is self-delimiting
//! and intended for offline/debug use, not the durability path.

use super::{seek_to, EntryPos, FileHeader, LogEntry, LogFormat, HEADER_SIZE};
use crate::io::{LogFile, Whence};
use forestkv_core::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl LogFormat for JsonFormat {
    fn write_header(&self, f: &mut LogFile, header: &FileHeader) -> Result<()> {
        let json = serde_json::to_string(header).map_err(|e| Error::Encoding(e.to_string()))?;
        if json.len() + 1 > HEADER_SIZE as usize {
            return Err(Error::InvalidFile(format!(
                "header json of {} bytes does not fit in {} byte region",
                json.len(),
                HEADER_SIZE
            )));
        }

        let mut line = json.into_bytes();
        line.resize(HEADER_SIZE as usize - 1, b' ');
        line.push(b'\n');

        f.seek(0, Whence::Start)?;
        f.write_all(&line)?;
        Ok(())
    }

    fn read_header(&self, f: &mut LogFile) -> Result<FileHeader> {
        f.seek(0, Whence::Start)?;
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        f.read_exact(&mut buf)?;
        let trimmed = String::from_utf8_lossy(&buf);
        let trimmed = trimmed.trim_end();
        serde_json::from_str(trimmed).map_err(|e| Error::InvalidFile(e.to_string()))
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

        let mut line =
            serde_json::to_vec(entry).map_err(|e| Error::Encoding(e.to_string()))?;
        line.push(b'\n');
        f.write_all(&line)?;
        Ok(line.len() as u64)
    }

    fn read_entry(&self, f: &mut LogFile, pos: u64) -> Result<(LogEntry, u64)> {
        f.seek(pos as i64, Whence::Start)?;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = f.read(&mut byte)?;
            if n == 0 {
                if line.is_empty() {
                    return Err(Error::CorruptEntry {
                        offset: pos,
                        reason: "eof before newline".into(),
                    });
                }
                return Err(Error::CorruptEntry {
                    offset: pos,
                    reason: "truncated entry: no terminating newline".into(),
                });
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }

        let entry: LogEntry = serde_json::from_slice(&line).map_err(|e| Error::CorruptEntry {
            offset: pos,
            reason: format!("decode failed: {e}"),
        })?;
        Ok((entry, line.len() as u64 + 1))
    }

    fn clone_format(&self) -> Box<dyn LogFormat> {
        Box::new(*self)
    }
}
