//! Ext-SHM: the growable, append-only arena that MAIN-SHM entries reference
//! by `(offset, len)`. Never mutated in place within a generation;
//! reclamation happens by compacting live data into a fresh generation and
//! atomically swapping the file a connection has mapped.

use crate::error::ShmError;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct ExtShm {
    path: PathBuf,
    file: std::fs::File,
    mmap: MmapMut,
    /// Byte offset of the next free slot. Only the arena owner mutates
    /// this; attached readers only ever read up to the generation's
    /// recorded length.
    cursor: AtomicU64,
}

impl ExtShm {
    pub fn create(path: impl AsRef<Path>, initial_capacity: u64) -> Result<ExtShm, ShmError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| ShmError::Open {
                path: path.display().to_string(),
                source,
            })?;
        file.set_len(initial_capacity).map_err(ShmError::Resize)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(ShmError::Map)?;
        Ok(ExtShm {
            path,
            file,
            mmap,
            cursor: AtomicU64::new(0),
        })
    }

    pub fn attach(path: impl AsRef<Path>) -> Result<ExtShm, ShmError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| ShmError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let len = file.metadata().map_err(ShmError::Resize)?.len();
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(ShmError::Map)?;
        Ok(ExtShm {
            path,
            file,
            mmap,
            cursor: AtomicU64::new(len),
        })
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Appends `bytes`, growing the backing file (and remapping) if the
    /// arena is full, and returns the offset the bytes were written at.
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<u64, ShmError> {
        let needed = bytes.len() as u64;
        let start = self.cursor.load(Ordering::SeqCst);
        let end = start + needed;
        if end > self.len() {
            self.grow(end.max(self.len() * 2).max(4096))?;
        }
        self.mmap[start as usize..end as usize].copy_from_slice(bytes);
        self.cursor.store(end, Ordering::SeqCst);
        Ok(start)
    }

    fn grow(&mut self, new_len: u64) -> Result<(), ShmError> {
        self.file.set_len(new_len).map_err(ShmError::Resize)?;
        self.file.flush().ok();
        self.mmap = unsafe { MmapOptions::new().map_mut(&self.file) }.map_err(ShmError::Map)?;
        Ok(())
    }

    pub fn read(&self, offset: u64, len: u32) -> Result<&[u8], ShmError> {
        let end = offset + len as u64;
        if end > self.len() {
            return Err(ShmError::OutOfBounds {
                offset,
                len: len as u64,
                mapped: self.len(),
            });
        }
        Ok(&self.mmap[offset as usize..end as usize])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<(), ShmError> {
        self.mmap.flush().map_err(ShmError::Map)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = ExtShm::create(dir.path().join("ext.shm"), 16).unwrap();
        let off1 = arena.alloc(b"hello").unwrap();
        let off2 = arena.alloc(b"world!!").unwrap();
        assert_eq!(arena.read(off1, 5).unwrap(), b"hello");
        assert_eq!(arena.read(off2, 7).unwrap(), b"world!!");
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = ExtShm::create(dir.path().join("ext.shm"), 4).unwrap();
        let payload = vec![7u8; 4096];
        let off = arena.alloc(&payload).unwrap();
        assert_eq!(arena.read(off, 4096).unwrap(), payload.as_slice());
    }
}
