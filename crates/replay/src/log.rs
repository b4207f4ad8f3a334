//! The append-only per-module notification log: a single segment file of
//! length-prefixed records plus an in-memory timestamp index rebuilt on
//! open. Mirrors a fragments-style append-only log addressed by a
//! monotonic offset, shrunk to a single
//! local file since this spec's replay log is process-local rather than
//! broker-backed.

use crate::error::ReplayError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One notification as stored in the log: its send timestamp, the xpath of
/// the notification schema node, and its serialized payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEntry {
    pub timestamp: i64,
    pub xpath: String,
    pub payload: Vec<u8>,
}

struct IndexEntry {
    timestamp: i64,
    offset: u64,
}

/// Append-only log for one module's notifications. Entries are never
/// mutated or reordered; the only mutator is [`ReplayLog::append`].
pub struct ReplayLog {
    path: PathBuf,
    file: File,
    index: Vec<IndexEntry>,
}

impl ReplayLog {
    pub fn open(path: impl AsRef<Path>) -> Result<ReplayLog, ReplayError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| ReplayError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let index = build_index(&file, &path)?;
        Ok(ReplayLog { path, file, index })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Appends one entry, returning its assigned offset. Callers are
    /// responsible for supplying a non-decreasing `timestamp` (a
    /// monotonicity invariant); this is not re-checked here since the
    /// orchestrator stamps notifications in send order.
    pub fn append(&mut self, timestamp: i64, xpath: &str, payload: &[u8]) -> Result<u64, ReplayError> {
        let offset = self.file.seek(SeekFrom::End(0)).map_err(ReplayError::Append)?;
        let mut buf = Vec::with_capacity(8 + 4 + xpath.len() + 4 + payload.len());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&(xpath.len() as u32).to_le_bytes());
        buf.extend_from_slice(xpath.as_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);
        self.file.write_all(&buf).map_err(ReplayError::Append)?;
        self.file.flush().map_err(ReplayError::Append)?;
        self.index.push(IndexEntry { timestamp, offset });
        Ok(offset)
    }

    fn read_at(&self, offset: u64) -> Result<ReplayEntry, ReplayError> {
        read_entry_at(&self.file, &self.path, offset)
    }

    /// The index of the first entry with `timestamp >= t0`, via binary
    /// search over the (non-decreasing) index.
    fn lower_bound(&self, t0: i64) -> usize {
        self.index.partition_point(|e| e.timestamp < t0)
    }

    /// Every entry with `timestamp` in `[t0, t1)` (or `[t0, +inf)` if `t1`
    /// is `None`), in timestamp order.
    pub fn replay_iter(&self, t0: i64, t1: Option<i64>) -> Result<Vec<ReplayEntry>, ReplayError> {
        let start = self.lower_bound(t0);
        let mut out = Vec::new();
        for entry in &self.index[start..] {
            if let Some(t1) = t1 {
                if entry.timestamp >= t1 {
                    break;
                }
            }
            out.push(self.read_at(entry.offset)?);
        }
        Ok(out)
    }
}

fn build_index(file: &File, path: &Path) -> Result<Vec<IndexEntry>, ReplayError> {
    let len = file.metadata().map_err(|source| ReplayError::Open {
        path: path.display().to_string(),
        source,
    })?.len();
    let mut index = Vec::new();
    let mut offset = 0u64;
    while offset < len {
        let entry = read_entry_at(file, path, offset)?;
        let record_len = 8 + 4 + entry.xpath.len() as u64 + 4 + entry.payload.len() as u64;
        index.push(IndexEntry {
            timestamp: entry.timestamp,
            offset,
        });
        offset += record_len;
    }
    Ok(index)
}

fn read_entry_at(file: &File, path: &Path, offset: u64) -> Result<ReplayEntry, ReplayError> {
    let mut file = file.try_clone().map_err(ReplayError::Append)?;
    file.seek(SeekFrom::Start(offset)).map_err(ReplayError::Append)?;

    let mut ts_buf = [0u8; 8];
    file.read_exact(&mut ts_buf)
        .map_err(|_| ReplayError::Corrupt { path: path.display().to_string(), offset })?;
    let timestamp = i64::from_le_bytes(ts_buf);

    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)
        .map_err(|_| ReplayError::Corrupt { path: path.display().to_string(), offset })?;
    let xpath_len = u32::from_le_bytes(len_buf) as usize;
    let mut xpath_buf = vec![0u8; xpath_len];
    file.read_exact(&mut xpath_buf)
        .map_err(|_| ReplayError::Corrupt { path: path.display().to_string(), offset })?;
    let xpath = String::from_utf8(xpath_buf)
        .map_err(|_| ReplayError::Corrupt { path: path.display().to_string(), offset })?;

    file.read_exact(&mut len_buf)
        .map_err(|_| ReplayError::Corrupt { path: path.display().to_string(), offset })?;
    let payload_len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; payload_len];
    file.read_exact(&mut payload)
        .map_err(|_| ReplayError::Corrupt { path: path.display().to_string(), offset })?;

    Ok(ReplayEntry { timestamp, xpath, payload })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_append_and_replay_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ReplayLog::open(dir.path().join("m.notif")).unwrap();
        log.append(10, "/m:a", b"p1").unwrap();
        log.append(20, "/m:b", b"p2").unwrap();
        log.append(30, "/m:c", b"p3").unwrap();

        let window = log.replay_iter(15, Some(31)).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].timestamp, 20);
        assert_eq!(window[1].timestamp, 30);
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.notif");
        {
            let mut log = ReplayLog::open(&path).unwrap();
            log.append(1, "/m:a", b"x").unwrap();
            log.append(2, "/m:b", b"y").unwrap();
        }
        let reopened = ReplayLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let all = reopened.replay_iter(0, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].xpath, "/m:b");
    }

    #[test]
    fn test_no_window_returns_all_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ReplayLog::open(dir.path().join("m.notif")).unwrap();
        log.append(5, "/m:a", b"x").unwrap();
        log.append(6, "/m:b", b"y").unwrap();
        let all = log.replay_iter(0, None).unwrap();
        assert_eq!(all.len(), 2);
    }
}
