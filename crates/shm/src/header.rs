//! The fixed-layout MAIN-SHM header: everything a newly attaching process
//! needs before it can locate the module table.

use std::sync::atomic::AtomicU64;

pub const MAGIC: u32 = 0x5953_4844; // "YSHD"
pub const HEADER_VERSION: u32 = 1;

/// Overlaid directly onto the first bytes of the MAIN-SHM mapping. Every
/// field here is read/written through raw pointer arithmetic rather than a
/// `&mut MainShmHeader` borrow, because the memory is concurrently mapped
/// (and mutated) by other processes.
#[repr(C)]
pub struct MainShmHeader {
    pub magic: u32,
    pub version: u32,
    /// Bumped on any schema-affecting rewrite; never decreases.
    pub generation: AtomicU64,
    pub creator_pid: u32,
    pub module_count: u32,
    pub module_capacity: u32,
    pub _pad: u32,
    /// Offset, within this same mapping, of the first `ModuleEntry`.
    pub module_table_offset: u64,
    /// Generation of the Ext-SHM arena this header's offsets are valid
    /// against. Bumped in lock-step with a compaction swap.
    pub ext_shm_generation: AtomicU64,
}

impl MainShmHeader {
    pub const SIZE: usize = std::mem::size_of::<MainShmHeader>();

    /// Initializes a freshly allocated header in place. Caller must ensure
    /// the backing memory is at least `SIZE` bytes and zeroed or otherwise
    /// not aliased by a live header.
    ///
    /// # Safety
    /// `ptr` must be valid for `SIZE` bytes, correctly aligned for
    /// `MainShmHeader`, and not observed by any other thread until this
    /// call returns.
    pub unsafe fn init(ptr: *mut u8, module_capacity: u32, creator_pid: u32) {
        let header = ptr as *mut MainShmHeader;
        std::ptr::write(
            header,
            MainShmHeader {
                magic: MAGIC,
                version: HEADER_VERSION,
                generation: AtomicU64::new(0),
                creator_pid,
                module_count: 0,
                module_capacity,
                _pad: 0,
                module_table_offset: Self::SIZE as u64,
                ext_shm_generation: AtomicU64::new(0),
            },
        );
    }

    /// Reinterprets a mapping's leading bytes as a header reference.
    ///
    /// # Safety
    /// `ptr` must be valid and aligned for `MainShmHeader` for the lifetime
    /// `'a`, and the bytes must already have been initialized by [`init`].
    pub unsafe fn from_ptr<'a>(ptr: *const u8) -> &'a MainShmHeader {
        &*(ptr as *const MainShmHeader)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_init_and_read_back() {
        let mut buf = vec![0u8; MainShmHeader::SIZE];
        unsafe {
            MainShmHeader::init(buf.as_mut_ptr(), 64, 1234);
            let header = MainShmHeader::from_ptr(buf.as_ptr());
            assert_eq!(header.magic, MAGIC);
            assert_eq!(header.version, HEADER_VERSION);
            assert_eq!(header.creator_pid, 1234);
            assert_eq!(header.module_capacity, 64);
            assert_eq!(
                header.generation.load(std::sync::atomic::Ordering::SeqCst),
                0
            );
        }
    }
}
