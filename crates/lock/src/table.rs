//! The blocking, in-process half of the module lock table: a
//! `Mutex`+`Condvar`-guarded state machine per module, with writer-preference
//! fairness and `ds_lock` session tracking. This is the portable path used
//! whenever locks are coordinated within a single process (or wherever the
//! [`crate::robust`] OS-mutex path is unavailable); it is driven the same
//! way regardless of which liveness mechanism backs cross-process recovery.

use crate::error::LockError;
use crate::session::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct ModuleLockState {
    read_count: u32,
    write_holder: Option<SessionId>,
    upgradable_holder: Option<SessionId>,
    ds_lock_holder: Option<SessionId>,
    waiting_writers: u32,
    /// Set when a holder died without the state being repaired yet.
    /// Every new lock attempt fails with `Inconsistent` until
    /// [`ModuleLock::clear_inconsistent`] runs.
    inconsistent: bool,
}

pub struct ModuleLock {
    name: String,
    state: Mutex<ModuleLockState>,
    cond: Condvar,
}

impl ModuleLock {
    fn new(name: impl Into<String>) -> ModuleLock {
        ModuleLock {
            name: name.into(),
            state: Mutex::new(ModuleLockState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_lock(&self, session: SessionId) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        self.check_consistent(&guard)?;
        // Writers take precedence: a new reader waits behind any queued
        // writer even if no writer currently holds the lock.
        guard = self
            .cond
            .wait_while(guard, |s| {
                !s.inconsistent && (s.write_holder.is_some() || s.waiting_writers > 0)
            })
            .unwrap();
        self.check_consistent(&guard)?;
        guard.read_count += 1;
        trace!(module = self.name, session = session.0, read_count = guard.read_count, "read_lock acquired");
        Ok(())
    }

    pub fn read_unlock(&self, session: SessionId) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        if guard.read_count == 0 {
            return Err(LockError::OperationFailed);
        }
        guard.read_count -= 1;
        trace!(module = self.name, session = session.0, read_count = guard.read_count, "read_unlock");
        self.cond.notify_all();
        Ok(())
    }

    /// Acquires the exclusive write lock directly, with no upgradable-read
    /// phase. Blocks indefinitely; callers that must bound the wait (e.g.
    /// `commit`) use [`ModuleLock::write_lock_timeout`] instead.
    pub fn write_lock(&self, session: SessionId) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        self.check_consistent(&guard)?;
        guard.waiting_writers += 1;
        let wait_result = self.cond.wait_while(guard, |s| {
            !s.inconsistent && (s.read_count > 0 || s.write_holder.is_some())
        });
        guard = wait_result.unwrap();
        guard.waiting_writers -= 1;
        if let Err(e) = self.check_consistent(&guard) {
            self.cond.notify_all();
            return Err(e);
        }
        guard.write_holder = Some(session);
        trace!(module = self.name, session = session.0, "write_lock acquired");
        Ok(())
    }

    /// Takes the **upgradable read lock**: admits like an
    /// ordinary reader (concurrent `read_lock` holders are unaffected) but
    /// only one session may hold it at a time, so it can later be promoted
    /// to the exclusive write lock via [`ModuleLock::upgrade_to_write`]
    /// without ever dropping module-level exclusivity against other
    /// upgraders. Counted in `read_count` like any other reader so
    /// `upgrade_to_write` can tell whether it is the last reader standing.
    pub fn upgradable_read_lock(&self, session: SessionId) -> Result<(), LockError> {
        self.upgradable_read_lock_timeout_inner(session, None)
    }

    /// Bounded-wait variant used by commit orchestration for the
    /// evaluate phase (`update`/`change`), which must not block forever
    /// behind a stuck reader or a dead upgrader that hasn't yet been
    /// reaped.
    pub fn upgradable_read_lock_timeout(&self, session: SessionId, timeout: Duration) -> Result<(), LockError> {
        self.upgradable_read_lock_timeout_inner(session, Some(Instant::now() + timeout))
    }

    fn upgradable_read_lock_timeout_inner(&self, session: SessionId, deadline: Option<Instant>) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        self.check_consistent(&guard)?;
        loop {
            if !guard.inconsistent && guard.write_holder.is_none() && guard.upgradable_holder.is_none() && guard.waiting_writers == 0 {
                break;
            }
            guard = match deadline {
                None => self.cond.wait(guard).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::Locked);
                    }
                    self.cond.wait_timeout(guard, deadline - now).unwrap().0
                }
            };
        }
        self.check_consistent(&guard)?;
        guard.upgradable_holder = Some(session);
        guard.read_count += 1;
        trace!(module = self.name, session = session.0, "upgradable_read_lock acquired");
        Ok(())
    }

    /// Promotes this session's held upgradable-read lock to the exclusive
    /// write lock ("then upgrade to write for store"): waits
    /// for every *other* reader to release (the upgrader's own read share
    /// does not count against itself), then atomically hands the lock over
    /// — no other session can acquire a conflicting lock in between, since
    /// `upgradable_holder` has excluded new upgraders and readers keep
    /// draining concurrently with the wait. While waiting, new readers are
    /// blocked behind it (`waiting_writers`) the same way they are for a
    /// plain writer, so the wait is bounded by currently-held reads only.
    pub fn upgrade_to_write(&self, session: SessionId, timeout: Duration) -> Result<(), LockError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        if guard.upgradable_holder != Some(session) {
            return Err(LockError::OperationFailed);
        }
        self.check_consistent(&guard)?;
        guard.waiting_writers += 1;
        loop {
            if !guard.inconsistent && guard.read_count <= 1 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                guard.waiting_writers -= 1;
                self.cond.notify_all();
                return Err(LockError::Locked);
            }
            guard = self.cond.wait_timeout(guard, deadline - now).unwrap().0;
        }
        guard.waiting_writers -= 1;
        if let Err(e) = self.check_consistent(&guard) {
            self.cond.notify_all();
            return Err(e);
        }
        guard.read_count -= 1;
        guard.upgradable_holder = None;
        guard.write_holder = Some(session);
        trace!(module = self.name, session = session.0, "upgraded to write_lock");
        Ok(())
    }

    /// Releases a held upgradable-read lock without ever upgrading it (the
    /// evaluate phase decided not to proceed to `store`, e.g. a `change`
    /// veto).
    pub fn release_upgradable(&self, session: SessionId) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        if guard.upgradable_holder != Some(session) {
            return Err(LockError::OperationFailed);
        }
        guard.upgradable_holder = None;
        guard.read_count -= 1;
        trace!(module = self.name, session = session.0, "upgradable_read_lock released");
        self.cond.notify_all();
        Ok(())
    }

    /// Bounded-wait variant used by commit orchestration, which must not
    /// block forever behind a stuck subscriber or a dead writer that
    /// hasn't yet been reaped.
    pub fn write_lock_timeout(
        &self,
        session: SessionId,
        timeout: Duration,
    ) -> Result<(), LockError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        self.check_consistent(&guard)?;
        guard.waiting_writers += 1;
        loop {
            if !guard.inconsistent && guard.read_count == 0 && guard.write_holder.is_none() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                guard.waiting_writers -= 1;
                return Err(LockError::Locked);
            }
            let (g, _timeout_result) = self.cond.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
        }
        guard.waiting_writers -= 1;
        if let Err(e) = self.check_consistent(&guard) {
            return Err(e);
        }
        guard.write_holder = Some(session);
        Ok(())
    }

    pub fn write_unlock(&self, session: SessionId) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        if guard.write_holder != Some(session) {
            return Err(LockError::OperationFailed);
        }
        guard.write_holder = None;
        guard.upgradable_holder = None;
        trace!(module = self.name, session = session.0, "write_unlock");
        self.cond.notify_all();
        Ok(())
    }

    /// Advisory, session-scoped, non-reentrant lock: fails `Locked` if any
    /// *other* session holds it, and also fails `Locked` on a second
    /// attempt by the same session (sysrepo-style non-reentrancy).
    pub fn ds_lock(&self, session: SessionId) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        self.check_consistent(&guard)?;
        if guard.ds_lock_holder.is_some() {
            return Err(LockError::Locked);
        }
        guard.ds_lock_holder = Some(session);
        trace!(module = self.name, session = session.0, "ds_lock acquired");
        Ok(())
    }

    pub fn ds_unlock(&self, session: SessionId) -> Result<(), LockError> {
        let mut guard = self.state.lock().unwrap();
        if guard.ds_lock_holder != Some(session) {
            return Err(LockError::OperationFailed);
        }
        guard.ds_lock_holder = None;
        trace!(module = self.name, session = session.0, "ds_unlock");
        Ok(())
    }

    pub fn is_ds_locked_by_other(&self, session: SessionId) -> bool {
        let guard = self.state.lock().unwrap();
        matches!(guard.ds_lock_holder, Some(holder) if holder != session)
    }

    /// Called when `session` is found to have died (robust-mutex
    /// owner-died, or an expired lease): releases every lock it held and
    /// marks the module inconsistent until [`clear_inconsistent`] runs.
    pub fn reap(&self, session: SessionId) {
        let mut guard = self.state.lock().unwrap();
        let mut touched = false;
        if guard.write_holder == Some(session) {
            guard.write_holder = None;
            guard.upgradable_holder = None;
            touched = true;
        }
        if guard.upgradable_holder == Some(session) {
            guard.upgradable_holder = None;
            guard.read_count = guard.read_count.saturating_sub(1);
            touched = true;
        }
        if guard.ds_lock_holder == Some(session) {
            guard.ds_lock_holder = None;
            touched = true;
        }
        if touched {
            guard.inconsistent = true;
            warn!(module = self.name, session = session.0, "reaped locks held by a dead session");
        }
        self.cond.notify_all();
    }

    pub fn clear_inconsistent(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.inconsistent = false;
        self.cond.notify_all();
    }

    fn check_consistent(&self, guard: &MutexGuard<ModuleLockState>) -> Result<(), LockError> {
        if guard.inconsistent {
            Err(LockError::Inconsistent)
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct LockTable {
    modules: Mutex<HashMap<String, Arc<ModuleLock>>>,
}

impl LockTable {
    pub fn new() -> LockTable {
        LockTable {
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn module(&self, name: &str) -> Arc<ModuleLock> {
        let mut modules = self.modules.lock().unwrap();
        modules
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ModuleLock::new(name)))
            .clone()
    }

    /// Acquires write locks for every named module, in sorted order, to
    /// prevent deadlock between transactions touching overlapping module
    /// sets. Returns the locks in acquisition order; on failure, every
    /// already-acquired lock in this call is released before returning.
    pub fn write_lock_ordered(
        &self,
        session: SessionId,
        mut module_names: Vec<String>,
        timeout: Duration,
    ) -> Result<Vec<Arc<ModuleLock>>, LockError> {
        module_names.sort();
        module_names.dedup();
        let mut acquired = Vec::with_capacity(module_names.len());
        for name in &module_names {
            let lock = self.module(name);
            match lock.write_lock_timeout(session, timeout) {
                Ok(()) => acquired.push(lock),
                Err(e) => {
                    for held in acquired.iter().rev() {
                        let _ = held.write_unlock(session);
                    }
                    return Err(e);
                }
            }
        }
        Ok(acquired)
    }

    /// Acquires upgradable-read locks for every named module, in sorted
    /// order, for the evaluate phase of a commit — concurrent plain readers
    /// are admitted on every one of these modules while they're held. On
    /// failure, every already-acquired lock in this call is released
    /// before returning.
    pub fn upgradable_read_lock_ordered(
        &self,
        session: SessionId,
        mut module_names: Vec<String>,
        timeout: Duration,
    ) -> Result<Vec<Arc<ModuleLock>>, LockError> {
        module_names.sort();
        module_names.dedup();
        let mut acquired = Vec::with_capacity(module_names.len());
        for name in &module_names {
            let lock = self.module(name);
            match lock.upgradable_read_lock_timeout(session, timeout) {
                Ok(()) => acquired.push(lock),
                Err(e) => {
                    for held in acquired.iter().rev() {
                        let _ = held.release_upgradable(session);
                    }
                    return Err(e);
                }
            }
        }
        Ok(acquired)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_read_locks_are_concurrent() {
        let lock = ModuleLock::new("m");
        lock.read_lock(SessionId(1)).unwrap();
        lock.read_lock(SessionId(2)).unwrap();
        lock.read_unlock(SessionId(1)).unwrap();
        lock.read_unlock(SessionId(2)).unwrap();
    }

    #[test]
    fn test_ds_lock_not_reentrant() {
        let lock = ModuleLock::new("m");
        lock.ds_lock(SessionId(1)).unwrap();
        let err = lock.ds_lock(SessionId(1)).unwrap_err();
        assert_eq!(err, LockError::Locked);
        lock.ds_unlock(SessionId(1)).unwrap();
        lock.ds_lock(SessionId(2)).unwrap();
    }

    #[test]
    fn test_ds_unlock_when_not_locked_fails() {
        let lock = ModuleLock::new("m");
        let err = lock.ds_unlock(SessionId(1)).unwrap_err();
        assert_eq!(err, LockError::OperationFailed);
    }

    #[test]
    fn test_write_lock_excludes_readers() {
        let lock = Arc::new(ModuleLock::new("m"));
        lock.write_lock(SessionId(1)).unwrap();
        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            lock2.read_lock(SessionId(2)).unwrap();
            lock2.read_unlock(SessionId(2)).unwrap();
        });
        thread::sleep(Duration::from_millis(20));
        lock.write_unlock(SessionId(1)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_reap_releases_and_marks_inconsistent() {
        let lock = ModuleLock::new("m");
        lock.write_lock(SessionId(1)).unwrap();
        lock.reap(SessionId(1));
        let err = lock.write_lock_timeout(SessionId(2), Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, LockError::Inconsistent);
        lock.clear_inconsistent();
        lock.write_lock_timeout(SessionId(2), Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn test_ordered_locking_prevents_partial_deadlock_acquire() {
        let table = LockTable::new();
        let locks = table
            .write_lock_ordered(SessionId(1), vec!["b".into(), "a".into()], Duration::from_millis(50))
            .unwrap();
        assert_eq!(locks[0].name(), "a");
        assert_eq!(locks[1].name(), "b");
        for l in &locks {
            l.write_unlock(SessionId(1)).unwrap();
        }
    }

    #[test]
    fn test_upgradable_lock_permits_concurrent_readers() {
        let lock = ModuleLock::new("m");
        lock.upgradable_read_lock(SessionId(1)).unwrap();
        lock.read_lock(SessionId(2)).unwrap();
        lock.read_unlock(SessionId(2)).unwrap();
        lock.release_upgradable(SessionId(1)).unwrap();
    }

    #[test]
    fn test_second_upgradable_lock_blocks_while_one_is_held() {
        let lock = Arc::new(ModuleLock::new("m"));
        lock.upgradable_read_lock(SessionId(1)).unwrap();
        let err = lock
            .upgradable_read_lock_timeout(SessionId(2), Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err, LockError::Locked);
        lock.release_upgradable(SessionId(1)).unwrap();
        lock.upgradable_read_lock_timeout(SessionId(2), Duration::from_millis(20)).unwrap();
    }

    #[test]
    fn test_upgrade_to_write_waits_for_other_readers_to_drain() {
        let lock = Arc::new(ModuleLock::new("m"));
        lock.upgradable_read_lock(SessionId(1)).unwrap();
        lock.read_lock(SessionId(2)).unwrap();

        let err = lock.upgrade_to_write(SessionId(1), Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, LockError::Locked);

        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            lock2.read_unlock(SessionId(2)).unwrap();
        });
        lock.upgrade_to_write(SessionId(1), Duration::from_secs(1)).unwrap();
        handle.join().unwrap();
        lock.write_unlock(SessionId(1)).unwrap();
    }

    #[test]
    fn test_upgrade_to_write_by_non_holder_fails() {
        let lock = ModuleLock::new("m");
        lock.upgradable_read_lock(SessionId(1)).unwrap();
        let err = lock.upgrade_to_write(SessionId(2), Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, LockError::OperationFailed);
        lock.release_upgradable(SessionId(1)).unwrap();
    }

    #[test]
    fn test_upgradable_read_lock_ordered_acquires_sorted() {
        let table = LockTable::new();
        let locks = table
            .upgradable_read_lock_ordered(SessionId(1), vec!["b".into(), "a".into()], Duration::from_millis(50))
            .unwrap();
        assert_eq!(locks[0].name(), "a");
        assert_eq!(locks[1].name(), "b");
        for l in &locks {
            l.release_upgradable(SessionId(1)).unwrap();
        }
    }
}
