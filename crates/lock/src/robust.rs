//! Robust, process-shared pthread mutex: the primary owner-death detection
//! path on platforms that support `PTHREAD_MUTEX_ROBUST`. A holder that
//! dies while the mutex is locked causes the next `lock()` to return
//! `Ok(LockOutcome::OwnerDied)` instead of blocking forever; the caller
//! must then repair shared state and call [`RobustMutex::mark_consistent`]
//! before further locks succeed normally.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

#[derive(Debug, thiserror::Error)]
pub enum RobustError {
    #[error("robust mutex is unrecoverable: a previous owner died without repair")]
    Unrecoverable,
    #[error("pthread mutex operation failed with errno {0}")]
    Errno(i32),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockOutcome {
    Acquired,
    /// The previous holder died while holding the lock. The caller owns
    /// recovery: inspect/repair shared state, then call
    /// [`RobustMutex::mark_consistent`] before unlocking.
    OwnerDied,
}

pub struct RobustMutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for RobustMutex {}
unsafe impl Sync for RobustMutex {}

impl RobustMutex {
    /// Initializes a robust, process-shared mutex in place.
    ///
    /// # Safety
    /// Must be called exactly once per underlying allocation, before any
    /// other process observes it (e.g. right after `MAIN-SHM` creation,
    /// never on an attached mapping).
    pub unsafe fn init_in_place(slot: *mut RobustMutex) {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        libc::pthread_mutexattr_init(attr.as_mut_ptr());
        libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST);
        let mut attr = attr.assume_init();

        let raw_ptr = (*slot).raw.get();
        libc::pthread_mutex_init(raw_ptr, &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
    }

    pub fn lock(&self) -> Result<LockOutcome, RobustError> {
        let rc = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
        match rc {
            0 => Ok(LockOutcome::Acquired),
            libc::EOWNERDEAD => Ok(LockOutcome::OwnerDied),
            libc::ENOTRECOVERABLE => Err(RobustError::Unrecoverable),
            other => Err(RobustError::Errno(other)),
        }
    }

    /// Must be called while holding the lock after an `OwnerDied` outcome,
    /// once shared state has been repaired, or the next lock attempt by
    /// any process returns `ENOTRECOVERABLE`.
    pub fn mark_consistent(&self) -> Result<(), RobustError> {
        let rc = unsafe { libc::pthread_mutex_consistent(self.raw.get()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(RobustError::Errno(rc))
        }
    }

    pub fn unlock(&self) -> Result<(), RobustError> {
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw.get()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(RobustError::Errno(rc))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lock_unlock_cycle() {
        let mut boxed = Box::new(RobustMutex {
            raw: UnsafeCell::new(unsafe { MaybeUninit::zeroed().assume_init() }),
        });
        unsafe { RobustMutex::init_in_place(boxed.as_mut() as *mut RobustMutex) };
        assert_eq!(boxed.lock().unwrap(), LockOutcome::Acquired);
        boxed.unlock().unwrap();
    }
}
