//! The MAIN-SHM mapping itself: header plus a fixed-capacity module table,
//! attach-or-create, and the install/remove/lookup operations a connection
//! needs to maintain its view of installed modules.

use crate::error::ShmError;
use crate::header::{MainShmHeader, HEADER_VERSION, MAGIC};
use crate::module::ModuleEntry;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

pub struct MainShm {
    path: PathBuf,
    file: std::fs::File,
    mmap: MmapMut,
}

impl MainShm {
    pub fn create(path: impl AsRef<Path>, module_capacity: u32) -> Result<MainShm, ShmError> {
        let path = path.as_ref().to_path_buf();
        let total_len = MainShmHeader::SIZE as u64 + module_capacity as u64 * ModuleEntry::SIZE as u64;
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
        file.set_len(total_len).map_err(ShmError::Resize)?;
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(ShmError::Map)?;

        let pid = std::process::id();
        unsafe {
            MainShmHeader::init(mmap.as_mut_ptr(), module_capacity, pid);
        }
        for slot in Self::module_slots_mut(&mut mmap, module_capacity) {
            *slot = ModuleEntry::empty();
        }
        info!(pid, module_capacity, path = %path.display(), "created MAIN-SHM");
        Ok(MainShm { path, file, mmap })
    }

    pub fn attach(path: impl AsRef<Path>) -> Result<MainShm, ShmError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| ShmError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(ShmError::Map)?;
        let shm = MainShm { path, file, mmap };
        {
            let header = shm.header();
            if header.magic != MAGIC {
                return Err(ShmError::BadMagic {
                    expected: MAGIC,
                    found: header.magic,
                });
            }
            if header.version != HEADER_VERSION {
                return Err(ShmError::VersionMismatch {
                    expected: HEADER_VERSION,
                    found: header.version,
                });
            }
        }
        debug!(path = %shm.path.display(), "attached MAIN-SHM");
        Ok(shm)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &MainShmHeader {
        unsafe { MainShmHeader::from_ptr(self.mmap.as_ptr()) }
    }

    pub fn generation(&self) -> u64 {
        self.header().generation.load(Ordering::SeqCst)
    }

    /// Bumps the generation counter. Callers must hold the module lock
    /// table's admin write lock (see `lock` crate) before calling this.
    pub fn bump_generation(&self) -> u64 {
        self.header().generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn module_slots_mut(mmap: &mut MmapMut, capacity: u32) -> &mut [ModuleEntry] {
        let ptr = unsafe { mmap.as_mut_ptr().add(MainShmHeader::SIZE) } as *mut ModuleEntry;
        unsafe { std::slice::from_raw_parts_mut(ptr, capacity as usize) }
    }

    fn modules(&self) -> &[ModuleEntry] {
        let capacity = self.header().module_capacity;
        let ptr = unsafe { self.mmap.as_ptr().add(MainShmHeader::SIZE) } as *const ModuleEntry;
        unsafe { std::slice::from_raw_parts(ptr, capacity as usize) }
    }

    fn modules_mut(&mut self) -> &mut [ModuleEntry] {
        let capacity = self.header().module_capacity;
        Self::module_slots_mut(&mut self.mmap, capacity)
    }

    pub fn find_module(&self, name: &str, ext: &crate::ext::ExtShm) -> Option<(usize, ModuleEntry)> {
        self.modules().iter().enumerate().find_map(|(i, m)| {
            if !m.is_occupied() {
                return None;
            }
            let bytes = ext.read(m.name_offset, m.name_len).ok()?;
            (bytes == name.as_bytes()).then_some((i, *m))
        })
    }

    pub fn install_module(
        &mut self,
        name: &str,
        revision: &str,
        ext: &mut crate::ext::ExtShm,
    ) -> Result<u64, ShmError> {
        if self.find_module(name, ext).is_some() {
            return Err(ShmError::AlreadyInstalled(name.to_string()));
        }
        let name_offset = ext.alloc(name.as_bytes())?;
        let revision_offset = ext.alloc(revision.as_bytes())?;
        let generation = self.bump_generation();

        let capacity = self.header().module_capacity;
        let module_count = self.header().module_count;
        if module_count >= capacity {
            return Err(ShmError::ModuleTableFull { capacity });
        }

        let slot = self
            .modules_mut()
            .iter_mut()
            .find(|m| !m.is_occupied())
            .expect("module_count < capacity implies a free slot exists");
        *slot = ModuleEntry {
            name_offset,
            name_len: name.len() as u32,
            revision_offset,
            revision_len: revision.len() as u32,
            generation,
            ..ModuleEntry::empty()
        };

        let header_ptr = self.mmap.as_mut_ptr() as *mut MainShmHeader;
        unsafe {
            (*header_ptr).module_count += 1;
        }
        info!(name, revision, generation, "installed module");
        Ok(generation)
    }

    pub fn remove_module(&mut self, name: &str, ext: &crate::ext::ExtShm) -> Result<u64, ShmError> {
        let (index, _) = self
            .find_module(name, ext)
            .ok_or_else(|| ShmError::NoSuchModule(name.to_string()))?;
        let generation = self.bump_generation();
        self.modules_mut()[index] = ModuleEntry::empty();
        let header_ptr = self.mmap.as_mut_ptr() as *mut MainShmHeader;
        unsafe {
            (*header_ptr).module_count -= 1;
        }
        info!(name, generation, "removed module");
        Ok(generation)
    }

    pub fn installed_module_names(&self, ext: &crate::ext::ExtShm) -> Vec<String> {
        self.modules()
            .iter()
            .filter(|m| m.is_occupied())
            .filter_map(|m| {
                let bytes = ext.read(m.name_offset, m.name_len).ok()?;
                String::from_utf8(bytes.to_vec()).ok()
            })
            .collect()
    }

    pub fn flush(&self) -> Result<(), ShmError> {
        self.mmap.flush().map_err(ShmError::Map)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ext::ExtShm;

    #[test]
    fn test_create_attach_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let shm_path = dir.path().join("main.shm");
        let ext_path = dir.path().join("ext.shm");

        let mut main = MainShm::create(&shm_path, 8).unwrap();
        let mut ext = ExtShm::create(&ext_path, 256).unwrap();
        let gen = main.install_module("m", "2024-01-01", &mut ext).unwrap();
        assert_eq!(gen, 1);
        main.flush().unwrap();
        ext.flush().unwrap();
        drop(main);
        drop(ext);

        let attached = MainShm::attach(&shm_path).unwrap();
        let ext2 = ExtShm::attach(&ext_path).unwrap();
        assert_eq!(attached.generation(), 1);
        assert_eq!(attached.installed_module_names(&ext2), vec!["m".to_string()]);
    }

    #[test]
    fn test_install_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut main = MainShm::create(dir.path().join("main.shm"), 8).unwrap();
        let mut ext = ExtShm::create(dir.path().join("ext.shm"), 256).unwrap();
        main.install_module("m", "2024-01-01", &mut ext).unwrap();
        let err = main.install_module("m", "2024-01-01", &mut ext).unwrap_err();
        assert!(matches!(err, ShmError::AlreadyInstalled(_)));
    }

    #[test]
    fn test_remove_module() {
        let dir = tempfile::tempdir().unwrap();
        let mut main = MainShm::create(dir.path().join("main.shm"), 8).unwrap();
        let mut ext = ExtShm::create(dir.path().join("ext.shm"), 256).unwrap();
        main.install_module("m", "2024-01-01", &mut ext).unwrap();
        main.remove_module("m", &ext).unwrap();
        assert!(main.find_module("m", &ext).is_none());
    }
}
