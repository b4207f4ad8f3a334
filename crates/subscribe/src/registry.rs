//! The in-process subscription table, mirrored to each module's Sub-SHM
//! roster: a flat registry of typed triggers kept in insertion order, with
//! a priority sort performed at read time rather than at insert time,
//! since priority ties break by registration order and new subscriptions
//! can arrive with any priority.

use crate::flags::SubFlags;
use crate::operational::stitch_operational;
use crate::subscription::{
    Callback, Handle, ModuleChangeCallback, ModuleChangePhase, ModuleChangeResult,
    NotificationCallback, OperationalCallback, RpcCallback, SubKind, Subscription,
};
use std::collections::HashSet;
use std::sync::Mutex;
use tree::{Pointer, Tree};

struct Inner {
    next_handle: u64,
    next_registration_order: u64,
    subscriptions: Vec<Subscription>,
    /// Handles observed not to have acked promptly at least once; surfaced
    /// to `commit` for eviction eligibility.
    unresponsive: HashSet<Handle>,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Inner {
    fn default() -> Inner {
        Inner {
            next_handle: 1,
            next_registration_order: 0,
            subscriptions: Vec::new(),
            unresponsive: HashSet::new(),
        }
    }
}

/// The one-shot bootstrap event synthesized for an `enabled` module-change
/// subscription at registration time: the current datastore
/// presented as "all creates", so the new subscriber can initialize state
/// without racing a real commit.
pub fn bootstrap_creates(current: &Tree) -> Vec<tree::DiffEntry> {
    tree::diff(&tree::Node::empty_container(), &current.root)
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    fn insert(
        &self,
        kind: SubKind,
        module: &str,
        xpath: Option<Pointer>,
        priority: i32,
        flags: SubFlags,
        session: u64,
        callback: Callback,
    ) -> Handle {
        let mut inner = self.inner.lock().unwrap();
        let handle = Handle(inner.next_handle);
        inner.next_handle += 1;
        let registration_order = inner.next_registration_order;
        inner.next_registration_order += 1;
        inner.subscriptions.push(Subscription {
            handle,
            kind,
            module: module.to_string(),
            xpath,
            priority,
            flags,
            session,
            registration_order,
            callback,
        });
        tracing::debug!(module, ?kind, priority, handle = handle.0, "subscription registered");
        handle
    }

    /// Registers a module-change subscriber. If `flags` carries `ENABLED`,
    /// returns the synthetic bootstrap `Δ` the caller should deliver to it
    /// immediately (the registry does not invoke callbacks itself for this
    /// bootstrap event — only the connection/session driving a live commit
    /// does that — so the caller is responsible for the delivery).
    pub fn subscribe_module_change(
        &self,
        module: &str,
        xpath: Option<Pointer>,
        priority: i32,
        flags: SubFlags,
        session: u64,
        callback: Box<ModuleChangeCallback>,
    ) -> Handle {
        self.insert(SubKind::ModuleChange, module, xpath, priority, flags, session, Callback::ModuleChange(callback))
    }

    pub fn subscribe_operational(
        &self,
        module: &str,
        xpath: Pointer,
        priority: i32,
        flags: SubFlags,
        session: u64,
        callback: Box<OperationalCallback>,
    ) -> Handle {
        self.insert(SubKind::OperationalGet, module, Some(xpath), priority, flags, session, Callback::OperationalGet(callback))
    }

    pub fn subscribe_rpc(
        &self,
        module: &str,
        path: Pointer,
        priority: i32,
        session: u64,
        callback: Box<RpcCallback>,
    ) -> Handle {
        self.insert(SubKind::Rpc, module, Some(path), priority, SubFlags::NONE, session, Callback::Rpc(callback))
    }

    pub fn subscribe_notification(
        &self,
        module: &str,
        xpath: Option<Pointer>,
        priority: i32,
        flags: SubFlags,
        session: u64,
        callback: Box<NotificationCallback>,
    ) -> Handle {
        self.insert(SubKind::Notification, module, xpath, priority, flags, session, Callback::Notification(callback))
    }

    /// Removes every subscription filed under `handle` (normally just one,
    /// unless registered with `CTX_REUSE`) and clears it from the
    /// unresponsive set so no lingering ack wait treats it as a member.
    pub fn unsubscribe(&self, handle: Handle) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions.retain(|s| s.handle != handle);
        inner.unresponsive.remove(&handle);
    }

    pub fn mark_unresponsive(&self, handle: Handle) {
        self.inner.lock().unwrap().unresponsive.insert(handle);
    }

    /// If `handle` was previously marked unresponsive, evicts it (removes
    /// its subscription) and returns `true`; otherwise a no-op. Called the
    /// next time the handle's connection touches the registry.
    pub fn evict_if_unresponsive(&self, handle: Handle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.unresponsive.remove(&handle) {
            inner.subscriptions.retain(|s| s.handle != handle);
            true
        } else {
            false
        }
    }

    /// Module-change subscribers for `module`, highest priority first, ties
    /// broken by registration order.
    pub fn module_change_subscribers(&self, module: &str) -> Vec<ModuleChangeHandle> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<_> = inner
            .subscriptions
            .iter()
            .filter(|s| s.kind == SubKind::ModuleChange && s.module == module)
            .map(|s| ModuleChangeHandle {
                handle: s.handle,
                flags: s.flags,
                priority: s.priority,
                registration_order: s.registration_order,
            })
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.registration_order.cmp(&b.registration_order)));
        out
    }

    /// Invokes a single module-change subscriber's callback by handle.
    /// Kept separate from iteration so `commit` can hold its own snapshot
    /// of ordering (taken once per event) while still calling through the
    /// live registry for the actual invocation.
    pub fn invoke_module_change(
        &self,
        handle: Handle,
        phase: ModuleChangePhase,
        delta: &[tree::DiffEntry],
    ) -> Option<ModuleChangeResult> {
        let inner = self.inner.lock().unwrap();
        let sub = inner.subscriptions.iter().find(|s| s.handle == handle)?;
        match &sub.callback {
            Callback::ModuleChange(cb) => Some(cb(phase, delta)),
            _ => None,
        }
    }

    pub fn rpc_subscriber(&self, module: &str, path: &Pointer) -> Option<Handle> {
        let inner = self.inner.lock().unwrap();
        inner
            .subscriptions
            .iter()
            .filter(|s| s.kind == SubKind::Rpc && s.module == module && s.xpath.as_ref() == Some(path))
            .max_by_key(|s| s.priority)
            .map(|s| s.handle)
    }

    pub fn invoke_rpc(&self, handle: Handle, input: &Tree) -> Option<Result<Tree, String>> {
        let inner = self.inner.lock().unwrap();
        let sub = inner.subscriptions.iter().find(|s| s.handle == handle)?;
        match &sub.callback {
            Callback::Rpc(cb) => Some(cb(input)),
            _ => None,
        }
    }

    pub fn notification_subscribers(&self, module: &str) -> Vec<Handle> {
        let inner = self.inner.lock().unwrap();
        inner
            .subscriptions
            .iter()
            .filter(|s| s.kind == SubKind::Notification && s.module == module)
            .map(|s| s.handle)
            .collect()
    }

    pub fn deliver_notification(&self, handle: Handle, event: replay::ReplayEvent) {
        let inner = self.inner.lock().unwrap();
        if let Some(sub) = inner.subscriptions.iter().find(|s| s.handle == handle) {
            if let Callback::Notification(cb) = &sub.callback {
                cb(event);
            }
        }
    }

    /// Calls every non-`passive` operational-get provider for `module`,
    /// ascending by priority, collecting the non-`None` contributions in
    /// that order: [`crate::operational::stitch_operational`] splices them
    /// in the same order so the highest-priority contribution lands last
    /// and wins on overlap.
    fn operational_contributions(&self, module: &str) -> Vec<(Pointer, tree::Node)> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<_> = inner
            .subscriptions
            .iter()
            .filter(|s| s.kind == SubKind::OperationalGet && s.module == module && !s.flags.contains(SubFlags::PASSIVE))
            .collect();
        entries.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.registration_order.cmp(&b.registration_order)));
        entries
            .into_iter()
            .filter_map(|s| {
                let xpath = s.xpath.clone()?;
                let Callback::OperationalGet(cb) = &s.callback else {
                    return None;
                };
                cb().map(|node| (xpath, node))
            })
            .collect()
    }

    /// Overlays every non-passive operational-get contribution for `module`
    /// onto `base`, in ascending-priority order.
    pub fn stitch_operational_for_module(&self, module: &str, base: &Tree) -> Tree {
        let contributions = self.operational_contributions(module);
        stitch_operational(base, &contributions)
    }
}

pub struct ModuleChangeHandle {
    pub handle: Handle,
    pub flags: SubFlags,
    pub priority: i32,
    pub registration_order: u64,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_priority_order_with_registration_tiebreak() {
        let registry = Registry::new();
        let h1 = registry.subscribe_module_change("m", None, 5, SubFlags::NONE, 1, Box::new(|_, _| ModuleChangeResult::Ok));
        let h2 = registry.subscribe_module_change("m", None, 10, SubFlags::NONE, 2, Box::new(|_, _| ModuleChangeResult::Ok));
        let h3 = registry.subscribe_module_change("m", None, 10, SubFlags::NONE, 3, Box::new(|_, _| ModuleChangeResult::Ok));
        let order: Vec<_> = registry.module_change_subscribers("m").into_iter().map(|s| s.handle).collect();
        assert_eq!(order, vec![h2, h3, h1]);
    }

    #[test]
    fn test_unsubscribe_removes_and_clears_unresponsive() {
        let registry = Registry::new();
        let h = registry.subscribe_module_change("m", None, 0, SubFlags::NONE, 1, Box::new(|_, _| ModuleChangeResult::Ok));
        registry.mark_unresponsive(h);
        registry.unsubscribe(h);
        assert!(registry.module_change_subscribers("m").is_empty());
        assert!(!registry.evict_if_unresponsive(h));
    }

    #[test]
    fn test_evict_if_unresponsive() {
        let registry = Registry::new();
        let h = registry.subscribe_module_change("m", None, 0, SubFlags::NONE, 1, Box::new(|_, _| ModuleChangeResult::Ok));
        assert!(!registry.evict_if_unresponsive(h));
        registry.mark_unresponsive(h);
        assert!(registry.evict_if_unresponsive(h));
        assert!(registry.module_change_subscribers("m").is_empty());
    }

    #[test]
    fn test_invoke_module_change_calls_through() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let h = registry.subscribe_module_change(
            "m",
            None,
            0,
            SubFlags::NONE,
            1,
            Box::new(move |_, _| {
                calls2.fetch_add(1, Ordering::SeqCst);
                ModuleChangeResult::Ok
            }),
        );
        let result = registry.invoke_module_change(h, ModuleChangePhase::Change, &[]);
        assert_eq!(result, Some(ModuleChangeResult::Ok));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rpc_subscriber_picks_highest_priority() {
        let registry = Registry::new();
        let path = Pointer::parse("/m:rpc").unwrap();
        registry.subscribe_rpc("m", path.clone(), 1, 1, Box::new(|_| Ok(Tree::empty(1))));
        let h2 = registry.subscribe_rpc("m", path.clone(), 5, 2, Box::new(|_| Ok(Tree::empty(1))));
        assert_eq!(registry.rpc_subscriber("m", &path), Some(h2));
    }
}
