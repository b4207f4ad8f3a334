//! `Session`: one client's view of a datastore — a staged edit over a
//! pinned base tree, plus the subscription/RPC/notification operations
//! that are naturally scoped to "who is asking" rather than to the
//! connection as a whole (§3 Session attributes, §4, §6).

use crate::connection::Connection;
use crate::datastore::DatastoreKind;
use crate::error::{ErrorRecord, SrError};
use edit::{EditOpts, Position, StagedEdit};
use lock::SessionId;
use plugin_api::AccessMode;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subscribe::{Handle, ModuleChangeCallback, ModuleChangePhase, OperationalCallback, RpcCallback, SubFlags};
use tree::{Children, Node, Op, OpMap, Pointer, Tree, Value};

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn module_of(path: &Pointer) -> Option<String> {
    match path.iter().next() {
        Some(tree::Token::Property(name)) => name.split(':').next().map(String::from),
        _ => None,
    }
}

/// Per-subscriber replay gating for the live phase, reimplemented here
/// rather than wrapping [`replay::ReplaySession`] directly: that type
/// drives its historical pass against a concrete `&ReplayLog`, but
/// `plugin_api::DatastorePlugin` only exposes a `notif_replay_iter`
/// query, not the log itself, so the historical pass and the stop-time
/// gate for real-time delivery are inlined against the plugin boundary.
struct ReplayGate {
    stop_time: Option<i64>,
    stopped: bool,
}

/// A client's session against one datastore kind of one [`Connection`].
/// Not `Sync`: like the teacher's request-scoped handles, a session is
/// meant to be driven from a single thread at a time.
pub struct Session {
    id: SessionId,
    nc_session_id: u64,
    connection: Arc<Connection>,
    ds_kind: DatastoreKind,
    effective_user: String,
    pinned_generation: u64,
    base: Tree,
    staged: StagedEdit,
    error: ErrorRecord,
    applied: bool,
    ds_locked_modules: HashSet<String>,
}

impl Session {
    /// Opens a session against `ds_kind`, pinning the connection's current
    /// schema generation (§3 Session invariant) and loading its base tree
    /// — `running`'s for `operational`, since that datastore is never
    /// stored directly (§3 Datastore instance invariant).
    pub(crate) fn new(connection: Arc<Connection>, ds_kind: DatastoreKind, user: impl Into<String>) -> Result<Session, SrError> {
        let (session_id, nc_session_id, generation) = connection.acquire_session_slot();
        let load_kind = if ds_kind == DatastoreKind::Operational {
            DatastoreKind::Running
        } else {
            ds_kind
        };
        match connection.plugin().load(load_kind.plugin_suffix()) {
            Ok(base) => Ok(Session {
                id: SessionId(session_id),
                nc_session_id,
                connection,
                ds_kind,
                effective_user: user.into(),
                pinned_generation: generation,
                staged: StagedEdit::new(base.clone()),
                base,
                error: ErrorRecord::default(),
                applied: false,
                ds_locked_modules: HashSet::new(),
            }),
            Err(e) => {
                connection.release_session_slot();
                Err(e.into())
            }
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn nc_session_id(&self) -> u64 {
        self.nc_session_id
    }

    pub fn datastore(&self) -> DatastoreKind {
        self.ds_kind
    }

    pub fn effective_user(&self) -> &str {
        &self.effective_user
    }

    pub fn error_record(&self) -> &ErrorRecord {
        &self.error
    }

    /// Elevating to a different effective user requires the process
    /// itself to be running as the configured superuser (§6 Access).
    pub fn set_effective_user(&mut self, user: impl Into<String>) -> Result<(), SrError> {
        self.begin_op()?;
        let running_uid = unsafe { libc::getuid() };
        if running_uid != self.connection.config().superuser_uid {
            let err = SrError::Unauthorized("elevating a session's effective user requires the superuser process".into());
            self.record_error(&err);
            return Err(err);
        }
        self.effective_user = user.into();
        Ok(())
    }

    /// Clears the previous operation's error record and fails fast with
    /// `ContextChanged` if the connection's schema generation has moved
    /// on since this session opened (§3 Session invariant); the staged
    /// edit is discarded in that case rather than left pointing at a
    /// schema that no longer matches.
    fn begin_op(&mut self) -> Result<(), SrError> {
        self.error.clear();
        if self.connection.generation() != self.pinned_generation {
            self.staged = StagedEdit::new(Tree::empty(self.pinned_generation));
            let err = SrError::ContextChanged;
            self.record_error(&err);
            return Err(err);
        }
        Ok(())
    }

    fn record_error(&mut self, err: &SrError) {
        self.error = ErrorRecord::from_error(err);
    }

    /// Calls the plugin's NACM-backed `access_check` for `module`/`mode`
    /// against this session's effective user (§6 Access: "operations are
    /// checked against the effective user of the session; read vs write
    /// required as in the header contract"). The core only calls the
    /// decision function; it never implements the policy itself (§1).
    fn check_access(&self, module: &str, mode: AccessMode) -> Result<(), SrError> {
        let allowed = self.connection.plugin().access_check(module, &self.effective_user, mode)?;
        if !allowed {
            return Err(SrError::Unauthorized(format!("{mode:?} denied for {:?} on module {module:?}", self.effective_user)));
        }
        Ok(())
    }

    /// A single leaf value (sysrepo's `get_item`); fails if `path`
    /// addresses a container, list, or leaf-list instead.
    pub fn get(&mut self, path: &Pointer) -> Result<Option<Value>, SrError> {
        match self.get_subtree(path)? {
            Some(Node::Leaf { value, .. }) => Ok(Some(value)),
            Some(_) => Err(SrError::InvalidArgument(format!("{path} does not address a leaf"))),
            None => Ok(None),
        }
    }

    /// The whole subtree rooted at `path`. Against `operational`, stitches
    /// that path's module's operational-provider contributions onto
    /// `running` before the lookup (§3, §4.5).
    pub fn get_subtree(&mut self, path: &Pointer) -> Result<Option<Node>, SrError> {
        self.begin_op()?;
        if let Some(module) = module_of(path) {
            self.check_access(&module, AccessMode::Read).map_err(|e| self.fail(e))?;
        }
        match self.ds_kind {
            DatastoreKind::Operational => {
                let module = module_of(path).ok_or_else(|| SrError::InvalidArgument(path.to_string()))?;
                let stitched = self.connection.registry().stitch_operational_for_module(&module, &self.base);
                Ok(StagedEdit::new(stitched).get(path).cloned())
            }
            _ => Ok(self.staged.get(path).cloned()),
        }
    }

    pub fn set(&mut self, path: &Pointer, value: Value, opts: EditOpts) -> Result<(), SrError> {
        self.begin_op()?;
        if let Some(module) = module_of(path) {
            self.check_access(&module, AccessMode::Write).map_err(|e| self.fail(e))?;
        }
        self.staged.set(path, value, opts).map_err(|e| self.fail(e.into()))
    }

    pub fn delete(&mut self, path: &Pointer, opts: EditOpts) -> Result<(), SrError> {
        self.begin_op()?;
        if let Some(module) = module_of(path) {
            self.check_access(&module, AccessMode::Write).map_err(|e| self.fail(e))?;
        }
        self.staged.delete(path, opts).map_err(|e| self.fail(e.into()))
    }

    pub fn move_entry(&mut self, path: &Pointer, position: Position) -> Result<(), SrError> {
        self.begin_op()?;
        if let Some(module) = module_of(path) {
            self.check_access(&module, AccessMode::Write).map_err(|e| self.fail(e))?;
        }
        self.staged.move_entry(path, position).map_err(|e| self.fail(e.into()))
    }

    /// Checks write access for every top-level module named in `edit`
    /// before merging it (§4.3 `edit_batch`); per-node operations nested
    /// under those top-level containers inherit the same module.
    pub fn edit_batch(&mut self, edit: &Children, ops: &OpMap, default_op: Op) -> Result<(), SrError> {
        self.begin_op()?;
        let mut seen = HashSet::new();
        for (name, _) in edit {
            if let Some(module) = name.split(':').next().map(String::from) {
                if seen.insert(module.clone()) {
                    self.check_access(&module, AccessMode::Write).map_err(|e| self.fail(e))?;
                }
            }
        }
        self.staged.edit_batch(edit, ops, default_op).map_err(|e| self.fail(e.into()))
    }

    fn fail(&mut self, err: SrError) -> SrError {
        self.record_error(&err);
        err
    }

    /// Runs the staged edit through the five-phase commit protocol
    /// against `ds_kind`'s orchestrator. On success the session's base and
    /// staged tree both move to the merged result; on failure (or a veto)
    /// the staged edit reverts to the pre-transaction base, so a
    /// subsequent `get` sees exactly the pre-transaction state (§4.4
    /// atomicity).
    pub fn apply_changes(&mut self) -> Result<(), SrError> {
        self.begin_op()?;
        if !self.ds_kind.is_writable_directly() {
            return Err(self.fail(SrError::Unsupported(format!("{} cannot be committed to directly", self.ds_kind))));
        }
        let schema = self.connection.schema_context();
        let orchestrator = self.connection.orchestrator_for(self.ds_kind);
        let base = self.base.clone();
        let staged = std::mem::replace(&mut self.staged, StagedEdit::new(base.clone()));
        match orchestrator.apply_changes(self.id, &base, staged, &schema) {
            Ok((merged, _delta)) => {
                self.staged = StagedEdit::new(merged.clone());
                self.base = merged;
                self.applied = true;
                Ok(())
            }
            Err(e) => {
                self.staged = StagedEdit::new(base);
                Err(self.fail(e.into()))
            }
        }
    }

    /// Copies `src` onto `dst` through the plugin ABI (§6 `copy_config`).
    /// Skips the write entirely when `src` is `running` and it hasn't
    /// changed since the last copy from it (SPEC_FULL.md §9 supplement,
    /// grounded on [`plugin_api::DatastorePlugin::running_modified`]). If
    /// `dst` is this session's own datastore, its base and staged tree are
    /// refreshed from the new stored state.
    pub fn copy_config(&mut self, src: DatastoreKind, dst: DatastoreKind) -> Result<(), SrError> {
        self.begin_op()?;
        if src == DatastoreKind::Running && !self.connection.plugin().running_modified(DatastoreKind::Running.plugin_suffix())? {
            return Ok(());
        }
        self.connection.plugin().copy(src.plugin_suffix(), dst.plugin_suffix())?;
        if dst == self.ds_kind {
            let fresh = self.connection.plugin().load(dst.plugin_suffix())?;
            self.staged = StagedEdit::new(fresh.clone());
            self.base = fresh;
        }
        Ok(())
    }

    /// Acquires the advisory, session-scoped, non-reentrant datastore lock
    /// on `module` (§4.3 `ds_lock`).
    pub fn lock(&mut self, module: &str) -> Result<(), SrError> {
        self.begin_op()?;
        self.connection.locks().module(module).ds_lock(self.id).map_err(|e| self.fail(e.into()))?;
        self.ds_locked_modules.insert(module.to_string());
        Ok(())
    }

    pub fn unlock(&mut self, module: &str) -> Result<(), SrError> {
        self.begin_op()?;
        self.connection.locks().module(module).ds_unlock(self.id).map_err(|e| self.fail(e.into()))?;
        self.ds_locked_modules.remove(module);
        Ok(())
    }

    /// Registers a module-change subscriber. If `flags` carries `ENABLED`,
    /// immediately delivers the synthetic bootstrap creates-Δ for the
    /// current base as a `Done`-phase (informational, non-vetoable)
    /// callback invocation, since the registry itself never invokes
    /// callbacks outside a live commit (§4.5 point 3).
    pub fn subscribe_module_change(
        &mut self,
        module: &str,
        xpath: Option<Pointer>,
        priority: i32,
        flags: SubFlags,
        callback: Box<ModuleChangeCallback>,
    ) -> Result<Handle, SrError> {
        self.begin_op()?;
        let registry = self.connection.registry();
        let handle = registry.subscribe_module_change(module, xpath, priority, flags, self.id.0, callback);
        if flags.contains(SubFlags::ENABLED) {
            let bootstrap = subscribe::bootstrap_creates(&self.base);
            let _ = registry.invoke_module_change(handle, ModuleChangePhase::Done, &bootstrap);
        }
        Ok(handle)
    }

    pub fn subscribe_operational(
        &mut self,
        module: &str,
        xpath: Pointer,
        priority: i32,
        flags: SubFlags,
        callback: Box<OperationalCallback>,
    ) -> Result<Handle, SrError> {
        self.begin_op()?;
        Ok(self.connection.registry().subscribe_operational(module, xpath, priority, flags, self.id.0, callback))
    }

    pub fn subscribe_rpc(&mut self, module: &str, path: Pointer, priority: i32, callback: Box<RpcCallback>) -> Result<Handle, SrError> {
        self.begin_op()?;
        Ok(self.connection.registry().subscribe_rpc(module, path, priority, self.id.0, callback))
    }

    /// Registers a notification subscriber and synchronously delivers the
    /// `[start_time, stop_time)` historical window followed by
    /// `ReplayComplete` before returning (§4.6 replay). Further live
    /// notifications arrive through `callback` via [`Session::send_event_notif`]
    /// until `stop_time` passes, at which point the subscriber gets one
    /// final `Stop` and is not invoked again.
    pub fn subscribe_notification(
        &mut self,
        module: &str,
        xpath: Option<Pointer>,
        priority: i32,
        flags: SubFlags,
        start_time: i64,
        stop_time: Option<i64>,
        callback: impl Fn(replay::ReplayEvent) + Send + Sync + 'static,
    ) -> Result<Handle, SrError> {
        self.begin_op()?;
        let callback = Arc::new(callback);
        let historical = self.connection.plugin().notif_replay_iter(module, start_time, stop_time)?;
        for entry in historical {
            callback(replay::ReplayEvent::Replay(entry));
        }
        callback(replay::ReplayEvent::ReplayComplete);

        let now = now_unix();
        let gate = Mutex::new(ReplayGate {
            stop_time,
            stopped: stop_time.map(|stop| stop <= now).unwrap_or(false),
        });
        if gate.lock().unwrap().stopped {
            callback(replay::ReplayEvent::Stop);
        }

        let live_callback = callback.clone();
        let handle = self.connection.registry().subscribe_notification(
            module,
            xpath,
            priority,
            flags,
            self.id.0,
            Box::new(move |event| {
                let mut g = gate.lock().unwrap();
                if g.stopped {
                    return;
                }
                if let replay::ReplayEvent::Realtime(ref entry) = event {
                    if let Some(stop) = g.stop_time {
                        if entry.timestamp >= stop {
                            g.stopped = true;
                            live_callback(replay::ReplayEvent::Stop);
                            return;
                        }
                    }
                }
                live_callback(event);
            }),
        );
        Ok(handle)
    }

    pub fn unsubscribe(&mut self, handle: Handle) -> Result<(), SrError> {
        self.begin_op()?;
        self.connection.registry().unsubscribe(handle);
        Ok(())
    }

    /// Appends `payload` to `module`'s replay log and delivers it
    /// real-time to every registered notification subscriber for that
    /// module (§4.6).
    pub fn send_event_notif(&mut self, module: &str, xpath: &Pointer, payload: &Tree) -> Result<(), SrError> {
        self.begin_op()?;
        let bytes = tree::serialize(payload).map_err(|e| self.fail(SrError::System(e.to_string())))?;
        let timestamp = now_unix();
        self.connection.plugin().notif_append(module, timestamp, &xpath.to_string(), &bytes)?;
        let entry = replay::ReplayEntry {
            timestamp,
            xpath: xpath.to_string(),
            payload: bytes,
        };
        let registry = self.connection.registry();
        for handle in registry.notification_subscribers(module) {
            registry.deliver_notification(handle, replay::ReplayEvent::Realtime(entry.clone()));
        }
        Ok(())
    }

    /// Dispatches a synchronous RPC call through the Sub-SHM RPC channel
    /// (§4.7), schema-validating `input` and the reply against the
    /// connection's current schema context.
    pub fn send_rpc(&mut self, module: &str, path: &Pointer, input: Tree, timeout: Duration) -> Result<Tree, SrError> {
        self.begin_op()?;
        let schema = self.connection.schema_context();
        let registry = self.connection.registry();
        rpc::rpc_send(&registry, module, path, input, Some(&schema), timeout).map_err(|e| self.fail(e.into()))
    }
}

/// Releases every lock still held and, for an un-applied `candidate`
/// session, resets `candidate` back to `running` (§3, SPEC_FULL.md §11
/// supplemented candidate-reset semantics).
impl Drop for Session {
    fn drop(&mut self) {
        for module in self.ds_locked_modules.drain() {
            let _ = self.connection.locks().module(&module).ds_unlock(self.id);
        }
        if self.ds_kind == DatastoreKind::Candidate && !self.applied {
            if let Err(e) = self.connection.plugin().candidate_reset(DatastoreKind::Candidate.plugin_suffix()) {
                tracing::warn!(error = %e, "candidate reset on session drop failed");
            }
        }
        self.connection.release_session_slot();
    }
}

/// Wraps a `MemoryPlugin` and denies every `access_check` for one named
/// user, regardless of module or mode, to exercise `Session::check_access`
/// without needing a real NACM implementation.
#[cfg(test)]
struct DenyingPlugin {
    inner: plugin_api::MemoryPlugin,
    denied_user: String,
}

#[cfg(test)]
impl plugin_api::DatastorePlugin for DenyingPlugin {
    fn init(&self, module: &str) -> Result<(), plugin_api::PluginError> {
        self.inner.init(module)
    }
    fn destroy(&self, module: &str) -> Result<(), plugin_api::PluginError> {
        self.inner.destroy(module)
    }
    fn store(&self, module: &str, tree: &Tree) -> Result<(), plugin_api::PluginError> {
        self.inner.store(module, tree)
    }
    fn load(&self, module: &str) -> Result<Tree, plugin_api::PluginError> {
        self.inner.load(module)
    }
    fn copy(&self, src_module: &str, dst_module: &str) -> Result<(), plugin_api::PluginError> {
        self.inner.copy(src_module, dst_module)
    }
    fn access_check(&self, module: &str, user: &str, mode: AccessMode) -> Result<bool, plugin_api::PluginError> {
        if user == self.denied_user {
            return Ok(false);
        }
        self.inner.access_check(module, user, mode)
    }
    fn candidate_reset(&self, module: &str) -> Result<(), plugin_api::PluginError> {
        self.inner.candidate_reset(module)
    }
    fn running_modified(&self, module: &str) -> Result<bool, plugin_api::PluginError> {
        self.inner.running_modified(module)
    }
    fn notif_append(&self, module: &str, ts: i64, xpath: &str, payload: &[u8]) -> Result<(), plugin_api::PluginError> {
        self.inner.notif_append(module, ts, xpath, payload)
    }
    fn notif_replay_iter(
        &self,
        module: &str,
        t0: i64,
        t1: Option<i64>,
    ) -> Result<Vec<replay::ReplayEntry>, plugin_api::PluginError> {
        self.inner.notif_replay_iter(module, t0, t1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use plugin_api::MemoryPlugin;
    use std::sync::Mutex as StdMutex;

    fn test_connection() -> (Arc<Connection>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::StoreConfig::new(dir.path().join("shm").to_str().unwrap(), 0);
        let plugin = Arc::new(MemoryPlugin::new(dir.path().join("notif")));
        let connection = Connection::open(config, plugin).unwrap();
        let mut nodes = std::collections::BTreeMap::new();
        nodes.insert(
            "/flag".to_string(),
            tree::SchemaNode {
                path: "/flag".into(),
                kind: tree::NodeKind::Leaf { mandatory: false },
                children: vec![],
            },
        );
        connection
            .install_module(tree::ModuleSchema {
                name: "m".to_string(),
                revision: "2024-01-01".into(),
                nodes,
                features: Vec::new(),
                feature_bitset: 0,
            })
            .unwrap();
        (Arc::new(connection), dir)
    }

    fn test_connection_denying(denied_user: &str) -> (Arc<Connection>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::StoreConfig::new(dir.path().join("shm").to_str().unwrap(), 0);
        let plugin = Arc::new(DenyingPlugin {
            inner: MemoryPlugin::new(dir.path().join("notif")),
            denied_user: denied_user.to_string(),
        });
        let connection = Connection::open(config, plugin).unwrap();
        let mut nodes = std::collections::BTreeMap::new();
        nodes.insert(
            "/flag".to_string(),
            tree::SchemaNode {
                path: "/flag".into(),
                kind: tree::NodeKind::Leaf { mandatory: false },
                children: vec![],
            },
        );
        connection
            .install_module(tree::ModuleSchema {
                name: "m".to_string(),
                revision: "2024-01-01".into(),
                nodes,
                features: Vec::new(),
                feature_bitset: 0,
            })
            .unwrap();
        (Arc::new(connection), dir)
    }

    #[test]
    fn test_access_check_denies_write_for_unauthorized_user() {
        let (connection, _dir) = test_connection_denying("eve");
        let mut session = Session::new(connection, DatastoreKind::Running, "eve").unwrap();
        let path = Pointer::parse("/m:flag").unwrap();
        let err = session.set(&path, Value::Bool(true), EditOpts::default()).unwrap_err();
        assert!(matches!(err, SrError::Unauthorized(_)));
    }

    #[test]
    fn test_access_check_allows_write_for_authorized_user() {
        let (connection, _dir) = test_connection_denying("eve");
        let mut session = Session::new(connection, DatastoreKind::Running, "alice").unwrap();
        let path = Pointer::parse("/m:flag").unwrap();
        session.set(&path, Value::Bool(true), EditOpts::default()).unwrap();
        session.apply_changes().unwrap();
        assert_eq!(session.get(&path).unwrap(), Some(Value::Bool(true)));
    }

    #[test]
    fn test_access_check_denies_read_for_unauthorized_user() {
        let (connection, _dir) = test_connection_denying("eve");
        let mut session = Session::new(connection, DatastoreKind::Running, "eve").unwrap();
        let path = Pointer::parse("/m:flag").unwrap();
        let err = session.get(&path).unwrap_err();
        assert!(matches!(err, SrError::Unauthorized(_)));
    }

    #[test]
    fn test_set_then_apply_then_get_roundtrips() {
        let (connection, _dir) = test_connection();
        let mut session = Session::new(connection, DatastoreKind::Running, "alice").unwrap();
        let path = Pointer::parse("/m:flag").unwrap();
        session.set(&path, Value::Bool(true), EditOpts::default()).unwrap();
        session.apply_changes().unwrap();
        assert_eq!(session.get(&path).unwrap(), Some(Value::Bool(true)));
    }

    #[test]
    fn test_apply_changes_rejected_against_operational() {
        let (connection, _dir) = test_connection();
        let mut session = Session::new(connection, DatastoreKind::Operational, "alice").unwrap();
        let err = session.apply_changes().unwrap_err();
        assert!(matches!(err, SrError::Unsupported(_)));
    }

    #[test]
    fn test_failed_commit_reverts_staged_edit() {
        let (connection, _dir) = test_connection();
        connection.registry().subscribe_module_change(
            "m",
            None,
            0,
            SubFlags::NONE,
            1,
            Box::new(|_, _| subscribe::ModuleChangeResult::Veto("no".into())),
        );
        let mut session = Session::new(connection, DatastoreKind::Running, "alice").unwrap();
        let path = Pointer::parse("/m:flag").unwrap();
        session.set(&path, Value::Bool(true), EditOpts::default()).unwrap();
        let err = session.apply_changes().unwrap_err();
        assert!(matches!(err, SrError::OperationFailed(_)));
        assert_eq!(session.get(&path).unwrap(), None);
    }

    #[test]
    fn test_ds_lock_excludes_other_session() {
        let (connection, _dir) = test_connection();
        let mut s1 = Session::new(connection.clone(), DatastoreKind::Running, "alice").unwrap();
        let mut s2 = Session::new(connection, DatastoreKind::Running, "bob").unwrap();
        s1.lock("m").unwrap();
        let err = s2.lock("m").unwrap_err();
        assert!(matches!(err, SrError::Locked(_)));
        s1.unlock("m").unwrap();
        s2.lock("m").unwrap();
    }

    #[test]
    fn test_context_changed_after_module_install_discards_staged_edit() {
        let (connection, _dir) = test_connection();
        let mut session = Session::new(connection.clone(), DatastoreKind::Running, "alice").unwrap();
        let path = Pointer::parse("/m:flag").unwrap();
        session.set(&path, Value::Bool(true), EditOpts::default()).unwrap();

        let mut nodes = std::collections::BTreeMap::new();
        nodes.insert(
            "/other".to_string(),
            tree::SchemaNode {
                path: "/other".into(),
                kind: tree::NodeKind::Leaf { mandatory: false },
                children: vec![],
            },
        );
        connection
            .install_module(tree::ModuleSchema {
                name: "n".to_string(),
                revision: "2024-01-01".into(),
                nodes,
                features: Vec::new(),
                feature_bitset: 0,
            })
            .unwrap();

        let err = session.apply_changes().unwrap_err();
        assert!(matches!(err, SrError::ContextChanged));
    }

    #[test]
    fn test_notification_replay_then_live_then_stop() {
        let (connection, _dir) = test_connection();
        let mut writer = Session::new(connection.clone(), DatastoreKind::Running, "alice").unwrap();
        let xpath = Pointer::parse("/m:evt").unwrap();
        writer.send_event_notif("m", &xpath, &Tree::empty(1)).unwrap();

        let events = Arc::new(StdMutex::new(Vec::new()));
        let events2 = events.clone();
        let mut reader = Session::new(connection, DatastoreKind::Running, "bob").unwrap();
        reader
            .subscribe_notification("m", None, 0, SubFlags::NONE, 0, Some(now_unix() + 100), move |e| {
                events2.lock().unwrap().push(e);
            })
            .unwrap();

        let recorded = events.lock().unwrap();
        assert!(recorded.iter().any(|e| matches!(e, replay::ReplayEvent::Replay(_))));
        assert!(recorded.iter().any(|e| matches!(e, replay::ReplayEvent::ReplayComplete)));
    }
}
