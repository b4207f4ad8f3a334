//! MAIN-SHM (fixed metadata header + module table) and Ext-SHM (append-only
//! variable-length arena), plus the deferred schema-change queue that lets
//! install/remove/feature-toggle operations wait for live sessions to
//! release an old generation before a new layout is materialized.

pub mod deferred;
pub mod error;
pub mod ext;
pub mod header;
pub mod main_shm;
pub mod module;

pub use deferred::{DeferredOp, DeferredQueue};
pub use error::ShmError;
pub use ext::ExtShm;
pub use header::{MainShmHeader, HEADER_VERSION, MAGIC};
pub use main_shm::MainShm;
pub use module::ModuleEntry;

/// Runs `read` against the current generation, retrying once if the
/// generation advanced while `read` was running. Mirrors the "reread the
/// generation after a read and retry on mismatch" torn-read avoidance
/// described for MAIN-SHM/Ext-SHM consumers.
pub fn with_generation_retry<T>(
    shm: &MainShm,
    mut read: impl FnMut(u64) -> T,
) -> T {
    loop {
        let observed = shm.generation();
        let result = read(observed);
        let current = shm.generation();
        if observed == current {
            return result;
        }
        tracing::debug!(observed, current, "MAIN-SHM generation changed mid-read, retrying");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generation_retry_converges_when_stable() {
        let dir = tempfile::tempdir().unwrap();
        let shm = MainShm::create(dir.path().join("main.shm"), 4).unwrap();
        let calls = std::cell::Cell::new(0);
        let result = with_generation_retry(&shm, |gen| {
            calls.set(calls.get() + 1);
            gen
        });
        assert_eq!(result, 0);
        assert_eq!(calls.get(), 1);
    }
}
