//! Sorted-run file codec
//!
//! A run file holds one sorted, deduplicated sequence of record keys.
//! Entry format:
//!
//! ```text
//! +------------------+
//! | Body Length      | (u32 LE)
//! +------------------+
//! | Shard            | (length-prefixed string)
//! +------------------+
//! | Datatype         | (length-prefixed string)
//! +------------------+
//! | Uid              | (length-prefixed string)
//! +------------------+
//! | Checksum         | (u32 LE, crc32 over the body)
//! +------------------+
//! ```
//!
//! The checksum is verified on every read; a mismatch is a corruption
//! error, never skipped.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::scan::RecordKey;

use super::errors::{MaterializeError, MaterializeResult};

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn take_string(body: &[u8], pos: &mut usize, path: &Path) -> MaterializeResult<String> {
    if body.len() < *pos + 4 {
        return Err(MaterializeError::Corrupt {
            path: path.display().to_string(),
        });
    }
    let len = u32::from_le_bytes(body[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if body.len() < *pos + len {
        return Err(MaterializeError::Corrupt {
            path: path.display().to_string(),
        });
    }
    let s = std::str::from_utf8(&body[*pos..*pos + len])
        .map_err(|_| MaterializeError::Corrupt {
            path: path.display().to_string(),
        })?
        .to_string();
    *pos += len;
    Ok(s)
}

/// Writes one sorted run.
pub struct RunWriter {
    path: PathBuf,
    out: BufWriter<File>,
    entries: usize,
}

impl RunWriter {
    pub fn create(path: impl Into<PathBuf>) -> MaterializeResult<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            entries: 0,
        })
    }

    pub fn write_key(&mut self, key: &RecordKey) -> MaterializeResult<()> {
        let mut body = Vec::new();
        put_string(&mut body, &key.shard);
        put_string(&mut body, &key.datatype);
        put_string(&mut body, &key.uid);

        let checksum = crc32fast::hash(&body);
        self.out.write_all(&(body.len() as u32).to_le_bytes())?;
        self.out.write_all(&body)?;
        self.out.write_all(&checksum.to_le_bytes())?;
        self.entries += 1;
        Ok(())
    }

    /// Flushes and syncs the run to disk.
    pub fn finish(mut self) -> MaterializeResult<usize> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads one run, verifying every entry's checksum.
pub struct RunReader {
    path: PathBuf,
    input: BufReader<File>,
}

impl RunReader {
    pub fn open(path: impl Into<PathBuf>) -> MaterializeResult<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            input: BufReader::new(file),
        })
    }

    pub fn read_key(&mut self) -> MaterializeResult<Option<RecordKey>> {
        let mut len_buf = [0u8; 4];
        match self.input.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let body_len = u32::from_le_bytes(len_buf) as usize;

        let mut body = vec![0u8; body_len];
        self.input.read_exact(&mut body).map_err(|_| {
            MaterializeError::Corrupt {
                path: self.path.display().to_string(),
            }
        })?;

        let mut crc_buf = [0u8; 4];
        self.input.read_exact(&mut crc_buf).map_err(|_| {
            MaterializeError::Corrupt {
                path: self.path.display().to_string(),
            }
        })?;
        if crc32fast::hash(&body) != u32::from_le_bytes(crc_buf) {
            return Err(MaterializeError::Corrupt {
                path: self.path.display().to_string(),
            });
        }

        let mut pos = 0;
        let shard = take_string(&body, &mut pos, &self.path)?;
        let datatype = take_string(&body, &mut pos, &self.path)?;
        let uid = take_string(&body, &mut pos, &self.path)?;
        Ok(Some(RecordKey {
            shard,
            datatype,
            uid,
        }))
    }

    /// Reads the whole run into memory.
    pub fn read_all(mut self) -> MaterializeResult<Vec<RecordKey>> {
        let mut keys = Vec::new();
        while let Some(key) = self.read_key()? {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(uid: &str) -> RecordKey {
        RecordKey::new("20240301_0", "d1", uid)
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run-00000.bin");

        let mut writer = RunWriter::create(&path).unwrap();
        for uid in ["u1", "u2", "u3"] {
            writer.write_key(&key(uid)).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let keys = RunReader::open(&path).unwrap().read_all().unwrap();
        assert_eq!(keys, vec![key("u1"), key("u2"), key("u3")]);
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run-00000.bin");

        let mut writer = RunWriter::create(&path).unwrap();
        writer.write_key(&key("u1")).unwrap();
        writer.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = RunReader::open(&path).unwrap().read_all();
        assert!(matches!(result, Err(MaterializeError::Corrupt { .. })));
    }

    #[test]
    fn test_empty_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run-00000.bin");
        let writer = RunWriter::create(&path).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
        assert!(RunReader::open(&path)
            .unwrap()
            .read_all()
            .unwrap()
            .is_empty());
    }
}
