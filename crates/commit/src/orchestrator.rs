//! The five-phase commit orchestrator: deterministic module-name
//! locking, then `update → change → store → done` on the happy path, or
//! `update|change|store → abort` the moment anything objects.

use crate::error::CommitError;
use lock::{LockTable, ModuleLock, SessionId};
use plugin_api::DatastorePlugin;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subscribe::{ModuleChangeHandle, ModuleChangePhase, ModuleChangeResult, Registry, SubFlags};
use subshm::{EventKind, SubShmRing};
use tree::{DiffEntry, Op, OpMap, SchemaContext, Tree};

pub type Delta = Vec<DiffEntry>;

const DEFAULT_RING_CAPACITY: usize = 64;

/// Ties the concurrency primitives, the subscription registry, and a
/// storage backend together into the `apply_changes` pipeline. One
/// orchestrator typically backs one datastore kind (e.g. `running`) shared
/// by every session in a connection.
pub struct CommitOrchestrator {
    datastore: String,
    locks: Arc<LockTable>,
    registry: Arc<Registry>,
    plugin: Arc<dyn DatastorePlugin>,
    rings: Mutex<HashMap<(String, EventKindKey), Arc<SubShmRing>>>,
    ack_timeout: Duration,
    next_event_id: AtomicU64,
}

type EventKindKey = EventKind;

impl CommitOrchestrator {
    /// `ack_timeout` bounds how long the orchestrator waits for every
    /// expected subscriber to ack a phase event before converting the
    /// transaction to an abort (default 10s).
    pub fn new(
        datastore: impl Into<String>,
        locks: Arc<LockTable>,
        registry: Arc<Registry>,
        plugin: Arc<dyn DatastorePlugin>,
        ack_timeout: Duration,
    ) -> CommitOrchestrator {
        CommitOrchestrator {
            datastore: datastore.into(),
            locks,
            registry,
            plugin,
            rings: Mutex::new(HashMap::new()),
            ack_timeout,
            next_event_id: AtomicU64::new(1),
        }
    }

    fn ring_for(&self, module: &str, kind: EventKind) -> Arc<SubShmRing> {
        let mut rings = self.rings.lock().unwrap();
        rings
            .entry((module.to_string(), kind))
            .or_insert_with(|| Arc::new(SubShmRing::new(module.to_string(), kind, DEFAULT_RING_CAPACITY)))
            .clone()
    }

    /// Runs the full five-phase protocol for a staged edit against `base`.
    /// On success returns the merged tree and the Δ that was actually
    /// stored (post-amendment, if an `update` phase ran).
    pub fn apply_changes(
        &self,
        session: SessionId,
        base: &Tree,
        mut staged: edit::StagedEdit,
        schema: &SchemaContext,
    ) -> Result<(Tree, Delta), CommitError> {
        let event_id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let (mut merged, mut delta) = edit::merge_and_diff(base, &staged, schema)?;
        let mut mods: Vec<String> = edit::mods(&delta).into_iter().collect();
        mods.sort();

        for name in &mods {
            let lock = self.locks.module(name);
            if lock.is_ds_locked_by_other(session) {
                return Err(CommitError::Locked { module: name.clone() });
            }
        }
        let mut guard = LockGuard::acquire(&self.locks, session, mods.clone())?;

        tracing::debug!(event_id, mods = ?mods, "commit starting");

        if self.any_update_subscriber(&mods) {
            match self.run_update_phase(&mods, &delta) {
                Ok(amendments) => {
                    for amendment in amendments {
                        staged
                            .edit_batch(&amendment, &OpMap::new(), Op::Merge)
                            .map_err(|e| CommitError::System(e.to_string()))?;
                    }
                    let (remerged, rediffed) = edit::merge_and_diff(base, &staged, schema)?;
                    merged = remerged;
                    delta = rediffed;
                }
                Err(e) => {
                    drop(guard);
                    return Err(e);
                }
            }
        }

        let mut delivered: Vec<(String, ModuleChangeHandle)> = Vec::new();
        let change_result = self.run_change_phase(&mods, &delta, &mut delivered);

        match change_result {
            Ok(()) => {}
            Err(e) => {
                self.run_abort_phase(&delivered, &delta, event_id);
                drop(guard);
                return Err(e);
            }
        }

        if let Err(e) = guard.upgrade_to_write(Duration::from_secs(10)) {
            self.run_abort_phase(&delivered, &delta, event_id);
            drop(guard);
            return Err(e);
        }

        if let Err(e) = self.plugin.store(&self.datastore, &merged) {
            self.run_abort_phase(&delivered, &delta, event_id);
            drop(guard);
            return Err(CommitError::Plugin(e));
        }

        self.run_done_phase(&mods, &delta);

        drop(guard);
        tracing::debug!(event_id, "commit complete");
        Ok((merged, delta))
    }

    fn any_update_subscriber(&self, mods: &[String]) -> bool {
        mods.iter().any(|m| {
            self.registry
                .module_change_subscribers(m)
                .iter()
                .any(|h| h.flags.contains(SubFlags::UPDATE))
        })
    }

    /// Phase 1: only update-flagged subscribers, per module, highest
    /// priority first. Collects every `Amend` payload returned; a `Veto`
    /// here is meaningless (only valid during `change`) and is logged and
    /// ignored rather than acted on.
    fn run_update_phase(
        &self,
        mods: &[String],
        delta: &[DiffEntry],
    ) -> Result<Vec<tree::Children>, CommitError> {
        let mut amendments = Vec::new();
        for module in mods {
            let roster: Vec<_> = self
                .registry
                .module_change_subscribers(module)
                .into_iter()
                .filter(|h| h.flags.contains(SubFlags::UPDATE))
                .collect();
            if roster.is_empty() {
                continue;
            }
            let results = self.deliver(module, EventKind::Update, ModuleChangePhase::Update, &roster, delta)?;
            for (handle, result) in results {
                match result {
                    ModuleChangeResult::Amend(children) => amendments.push(children),
                    ModuleChangeResult::Veto(message) => {
                        tracing::warn!(module, handle = handle.0, message, "veto returned during update phase, ignored");
                    }
                    ModuleChangeResult::Ok => {}
                }
            }
        }
        Ok(amendments)
    }

    /// Phase 2: every change subscriber (excluding `done_only`), per
    /// module in lock order, highest priority first within a module. Stops
    /// and returns the first veto encountered; every subscriber delivered
    /// to before that point (inclusive of the vetoer) is appended to
    /// `delivered` so `run_abort_phase` can reverse-deliver to exactly that
    /// set.
    fn run_change_phase(
        &self,
        mods: &[String],
        delta: &[DiffEntry],
        delivered: &mut Vec<(String, ModuleChangeHandle)>,
    ) -> Result<(), CommitError> {
        for module in mods {
            let roster: Vec<_> = self
                .registry
                .module_change_subscribers(module)
                .into_iter()
                .filter(|h| !h.flags.contains(SubFlags::DONE_ONLY))
                .collect();
            if roster.is_empty() {
                continue;
            }
            let results = self.deliver(module, EventKind::Change, ModuleChangePhase::Change, &roster, delta)?;
            for (handle, result) in results {
                let handle_info = roster.iter().find(|h| h.handle == handle).expect("delivered handle is in roster").clone_info();
                delivered.push((module.clone(), handle_info));
                if let ModuleChangeResult::Veto(message) = result {
                    return Err(CommitError::Veto {
                        module: module.clone(),
                        subscriber: handle,
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    /// Phase 4: every module-change subscriber for each touched module,
    /// including `done_only` ones. Non-vetoable; any `Veto` returned here
    /// is logged only, not propagated as a failure.
    fn run_done_phase(&self, mods: &[String], delta: &[DiffEntry]) {
        for module in mods {
            let roster = self.registry.module_change_subscribers(module);
            if roster.is_empty() {
                continue;
            }
            match self.deliver(module, EventKind::Done, ModuleChangePhase::Done, &roster, delta) {
                Ok(results) => {
                    for (handle, result) in results {
                        if let ModuleChangeResult::Veto(message) = result {
                            tracing::warn!(module, handle = handle.0, message, "veto returned during done phase, ignored");
                        }
                    }
                }
                Err(e) => tracing::warn!(module, error = %e, "done phase ack wait failed, ignored"),
            }
        }
    }

    /// Phase 5: reverse-priority redelivery to exactly the subscribers
    /// that already received `change` for this event, grouped back by
    /// module in the reverse of their delivery order.
    fn run_abort_phase(&self, delivered: &[(String, ModuleChangeHandle)], delta: &[DiffEntry], event_id: u64) {
        for (module, handle_info) in delivered.iter().rev() {
            let result = self.registry.invoke_module_change(handle_info.handle, ModuleChangePhase::Abort, delta);
            match result {
                Some(ModuleChangeResult::Veto(message)) => {
                    tracing::warn!(event_id, module, handle = handle_info.handle.0, message, "veto returned during abort phase, ignored");
                }
                Some(_) | None => {}
            }
        }
    }

    /// Posts one Sub-SHM event for `module`/`kind` expecting an ack from
    /// every member of `roster` (bit = roster index), invokes each
    /// subscriber synchronously in the order given, acking immediately
    /// since delivery is in-process, then blocks on `wait_for_acks` so a
    /// slow or wedged callback still manifests as the configured timeout
    /// rather than silently skipping the totality guarantee.
    fn deliver(
        &self,
        module: &str,
        kind: EventKind,
        phase: ModuleChangePhase,
        roster: &[ModuleChangeHandle],
        delta: &[DiffEntry],
    ) -> Result<Vec<(subscribe::Handle, ModuleChangeResult)>, CommitError> {
        if roster.len() > 63 {
            tracing::warn!(module, count = roster.len(), "more than 63 subscribers on one module change event, truncating ack mask");
        }
        let mask: u64 = roster.iter().enumerate().take(63).map(|(i, _)| 1u64 << i).fold(0, |a, b| a | b);
        let ring = self.ring_for(module, kind);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let event = ring.post(module.to_string(), 0, 0, 0, 0, 0, now, mask);

        let mut results = Vec::with_capacity(roster.len());
        for (i, h) in roster.iter().enumerate() {
            let result = self
                .registry
                .invoke_module_change(h.handle, phase, delta)
                .unwrap_or(ModuleChangeResult::Ok);
            if i < 63 {
                let _ = ring.ack(event.event_id, 1u64 << i);
            }
            results.push((h.handle, result));
        }
        if mask != 0 {
            ring.wait_for_acks(event.event_id, self.ack_timeout).map_err(|source| CommitError::AckTimeout {
                module: module.to_string(),
                phase: kind,
                source,
            })?;
        }
        Ok(results)
    }
}

impl ModuleChangeHandle {
    fn clone_info(&self) -> ModuleChangeHandle {
        ModuleChangeHandle {
            handle: self.handle,
            flags: self.flags,
            priority: self.priority,
            registration_order: self.registration_order,
        }
    }
}

/// Holds an upgradable read lock on every touched module through `update`
/// and `change` — concurrent plain readers are admitted the whole time —
/// then upgrades every one of them to the exclusive write lock right
/// before `store`. Releases whatever it is holding (the
/// upgradable lock if `store` was never reached, the write lock otherwise)
/// on drop, regardless of which path out of `apply_changes` is taken.
struct LockGuard {
    session: SessionId,
    locks: Vec<Arc<ModuleLock>>,
    /// Parallel to `locks`: whether that lock has been upgraded to write.
    /// Tracked per-lock (not as one flag for the whole guard) because
    /// `upgrade_to_write` can fail partway through, leaving a prefix of
    /// `locks` upgraded and the rest still upgradable-held.
    upgraded: Vec<bool>,
}

impl LockGuard {
    fn acquire(table: &LockTable, session: SessionId, mods: Vec<String>) -> Result<LockGuard, CommitError> {
        let locks = table.upgradable_read_lock_ordered(session, mods, Duration::from_secs(10))?;
        let upgraded = vec![false; locks.len()];
        Ok(LockGuard { session, locks, upgraded })
    }

    /// Upgrades every held lock to exclusive write, in the same order they
    /// were acquired in.
    fn upgrade_to_write(&mut self, timeout: Duration) -> Result<(), CommitError> {
        for (lock, upgraded) in self.locks.iter().zip(self.upgraded.iter_mut()) {
            lock.upgrade_to_write(self.session, timeout)?;
            *upgraded = true;
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        for (lock, upgraded) in self.locks.iter().zip(self.upgraded.iter()).rev() {
            let _ = if *upgraded {
                lock.write_unlock(self.session)
            } else {
                lock.release_upgradable(self.session)
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use edit::StagedEdit;
    use plugin_api::MemoryPlugin;
    use tree::{ModuleSchema, Node, NodeKind, SchemaNode, Value};

    fn schema() -> SchemaContext {
        let mut nodes = std::collections::BTreeMap::new();
        for leaf in ["/flag", "/other"] {
            nodes.insert(
                leaf.to_string(),
                SchemaNode {
                    path: leaf.to_string(),
                    kind: NodeKind::Leaf { mandatory: false },
                    children: vec![],
                },
            );
        }
        let mut ctx = SchemaContext::new(1);
        ctx.install(ModuleSchema {
            name: "m".to_string(),
            revision: "2024-01-01".into(),
            nodes,
            features: Vec::new(),
            feature_bitset: 0,
        });
        ctx
    }

    fn orchestrator() -> (CommitOrchestrator, Arc<MemoryPlugin>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let plugin = Arc::new(MemoryPlugin::new(dir.path()));
        plugin.init("running").unwrap();
        let orch = CommitOrchestrator::new(
            "running",
            Arc::new(LockTable::new()),
            Arc::new(Registry::new()),
            plugin.clone(),
            Duration::from_secs(1),
        );
        (orch, plugin, dir)
    }

    #[test]
    fn test_commit_with_no_subscribers_stores_directly() {
        let (orch, _plugin, _dir) = orchestrator();
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base.clone());
        staged.set(&tree::Pointer::parse("/m:flag").unwrap(), Value::Bool(true), edit::EditOpts::default()).unwrap();
        let (merged, delta) = orch.apply_changes(SessionId(1), &base, staged, &schema()).unwrap();
        assert!(!delta.is_empty());
        assert_eq!(merged.root.child("m:flag"), Some(&Node::leaf(Value::Bool(true))));
    }

    #[test]
    fn test_change_veto_aborts_and_does_not_store() {
        let (orch, plugin, _dir) = orchestrator();
        orch.registry.subscribe_module_change(
            "m",
            None,
            0,
            SubFlags::NONE,
            1,
            Box::new(|_, _| ModuleChangeResult::Veto("no".into())),
        );
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base.clone());
        staged.set(&tree::Pointer::parse("/m:flag").unwrap(), Value::Bool(true), edit::EditOpts::default()).unwrap();
        let err = orch.apply_changes(SessionId(1), &base, staged, &schema()).unwrap_err();
        assert!(matches!(err, CommitError::Veto { .. }));

        assert_eq!(plugin.load("running").unwrap(), Tree::empty(0));
    }

    #[test]
    fn test_abort_delivered_in_reverse_priority_to_change_recipients_only() {
        let (orch, _plugin, _dir) = orchestrator();
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_low = order.clone();
        let order_high = order.clone();
        orch.registry.subscribe_module_change(
            "m",
            None,
            1,
            SubFlags::NONE,
            1,
            Box::new(move |phase, _| {
                if phase == ModuleChangePhase::Abort {
                    order_low.lock().unwrap().push("low");
                }
                ModuleChangeResult::Ok
            }),
        );
        orch.registry.subscribe_module_change(
            "m",
            None,
            10,
            SubFlags::NONE,
            2,
            Box::new(move |phase, _| {
                if phase == ModuleChangePhase::Abort {
                    order_high.lock().unwrap().push("high");
                }
                if phase == ModuleChangePhase::Change {
                    return ModuleChangeResult::Veto("stop".into());
                }
                ModuleChangeResult::Ok
            }),
        );
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base.clone());
        staged.set(&tree::Pointer::parse("/m:flag").unwrap(), Value::Bool(true), edit::EditOpts::default()).unwrap();
        let err = orch.apply_changes(SessionId(1), &base, staged, &schema()).unwrap_err();
        assert!(matches!(err, CommitError::Veto { .. }));
        // "high" (priority 10) is delivered change first and vetoes; abort
        // then reverse-delivers starting from the highest priority, so
        // "high" aborts before "low".
        assert_eq!(*order.lock().unwrap(), vec!["high"]);
    }

    #[test]
    fn test_update_phase_amendment_is_remerged() {
        let (orch, _plugin, _dir) = orchestrator();
        orch.registry.subscribe_module_change(
            "m",
            None,
            0,
            SubFlags::UPDATE,
            1,
            Box::new(|_, _| {
                let children: tree::Children = vec![("m:other".to_string(), Node::leaf(Value::Bool(false)))];
                ModuleChangeResult::Amend(children)
            }),
        );
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base.clone());
        staged.set(&tree::Pointer::parse("/m:flag").unwrap(), Value::Bool(true), edit::EditOpts::default()).unwrap();
        let (merged, _delta) = orch.apply_changes(SessionId(1), &base, staged, &schema()).unwrap();
        assert_eq!(merged.root.child("m:other"), Some(&Node::leaf(Value::Bool(false))));
    }

    #[test]
    fn test_locked_by_other_session_rejected() {
        let (orch, _plugin, _dir) = orchestrator();
        let lock = orch.locks.module("m");
        lock.ds_lock(SessionId(99)).unwrap();
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base.clone());
        staged.set(&tree::Pointer::parse("/m:flag").unwrap(), Value::Bool(true), edit::EditOpts::default()).unwrap();
        let err = orch.apply_changes(SessionId(1), &base, staged, &schema()).unwrap_err();
        assert!(matches!(err, CommitError::Locked { .. }));
    }
}
