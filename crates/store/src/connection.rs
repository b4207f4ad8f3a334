//! `Connection`: owns the shared schema context, MAIN-SHM/Ext-SHM handle,
//! the subscription registry, module lock table, and per-datastore commit
//! orchestrators every child `Session` shares (§3 Connection invariant:
//! "all sessions from a connection share one schema context; when the
//! generation advances, the connection rebuilds its context before any
//! session may proceed").

use crate::config::StoreConfig;
use crate::datastore::DatastoreKind;
use crate::error::SrError;
use crate::session::Session;
use commit::CommitOrchestrator;
use lock::LockTable;
use plugin_api::DatastorePlugin;
use shm::{DeferredOp, DeferredQueue, ExtShm, MainShm};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use subscribe::Registry;
use tree::{ModuleSchema, SchemaContext};

pub struct Connection {
    config: StoreConfig,
    main_shm: Mutex<MainShm>,
    ext_shm: Mutex<ExtShm>,
    schema: RwLock<SchemaContext>,
    registry: Arc<Registry>,
    locks: Arc<LockTable>,
    plugin: Arc<dyn DatastorePlugin>,
    orchestrators: Mutex<HashMap<DatastoreKind, Arc<CommitOrchestrator>>>,
    deferred: Mutex<DeferredQueue>,
    /// Full `ModuleSchema`s awaiting a deferred install; `DeferredOp`
    /// itself only carries the MAIN-SHM-facing `(name, revision)` pair.
    pending_schemas: Mutex<HashMap<String, ModuleSchema>>,
    /// Sessions currently pinned to the live schema generation; the
    /// deferred queue only drains once this reaches zero (§9 "Pending
    /// list of deferred operations").
    active_sessions: AtomicUsize,
    next_session_id: AtomicU64,
    next_nc_id: AtomicU64,
}

impl Connection {
    /// Attaches to an existing MAIN-SHM/Ext-SHM pair under
    /// `config.shm_prefix`, or creates them if this is the first process to
    /// do so (§3 Ownership: "logical owner is the first process to create
    /// it; subsequent processes attach").
    pub fn open(config: StoreConfig, plugin: Arc<dyn DatastorePlugin>) -> Result<Connection, SrError> {
        std::fs::create_dir_all(&config.shm_prefix).map_err(|e| SrError::InitFailed(e.to_string()))?;
        std::fs::create_dir_all(config.replay_dir()).map_err(|e| SrError::InitFailed(e.to_string()))?;

        let main_shm_path = config.main_shm_path();
        let ext_shm_path = config.ext_shm_path();
        let (main_shm, ext_shm) = if main_shm_path.exists() {
            (MainShm::attach(&main_shm_path)?, ExtShm::attach(&ext_shm_path)?)
        } else {
            (
                MainShm::create(&main_shm_path, config.module_capacity)?,
                ExtShm::create(&ext_shm_path, 4096)?,
            )
        };
        let generation = main_shm.generation();

        for kind in [DatastoreKind::Startup, DatastoreKind::Running, DatastoreKind::Candidate] {
            plugin.init(kind.plugin_suffix())?;
        }

        Ok(Connection {
            config,
            main_shm: Mutex::new(main_shm),
            ext_shm: Mutex::new(ext_shm),
            schema: RwLock::new(SchemaContext::new(generation)),
            registry: Arc::new(Registry::new()),
            locks: Arc::new(LockTable::new()),
            plugin,
            orchestrators: Mutex::new(HashMap::new()),
            deferred: Mutex::new(DeferredQueue::new()),
            pending_schemas: Mutex::new(HashMap::new()),
            active_sessions: AtomicUsize::new(0),
            next_session_id: AtomicU64::new(1),
            next_nc_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.main_shm.lock().unwrap().generation()
    }

    pub fn schema_context(&self) -> SchemaContext {
        self.schema.read().unwrap().clone()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn locks(&self) -> Arc<LockTable> {
        self.locks.clone()
    }

    pub fn plugin(&self) -> Arc<dyn DatastorePlugin> {
        self.plugin.clone()
    }

    /// Lazily creates (and thereafter reuses) the commit orchestrator
    /// backing `kind`. `operational` never gets one of its own since it is
    /// never committed to directly (§3 Datastore instance invariant).
    pub fn orchestrator_for(&self, kind: DatastoreKind) -> Arc<CommitOrchestrator> {
        let mut orchestrators = self.orchestrators.lock().unwrap();
        orchestrators
            .entry(kind)
            .or_insert_with(|| {
                Arc::new(CommitOrchestrator::new(
                    kind.plugin_suffix(),
                    self.locks.clone(),
                    self.registry.clone(),
                    self.plugin.clone(),
                    self.config.commit_timeout,
                ))
            })
            .clone()
    }

    /// Installs a module's schema. Applied immediately if no session is
    /// live; otherwise deferred until the last referencing session
    /// releases (§3 Module lifecycle, §9 deferred list).
    pub fn install_module(&self, schema: ModuleSchema) -> Result<(), SrError> {
        if self.active_sessions.load(Ordering::SeqCst) == 0 {
            self.materialize_install(schema)
        } else {
            self.deferred.lock().unwrap().push(DeferredOp::Install {
                name: schema.name.clone(),
                revision: schema.revision.clone(),
            });
            // Stash the schema itself for the eventual drain; DeferredOp
            // only carries name/revision (the MAIN-SHM-facing shape), so
            // the full ModuleSchema is kept in a side table keyed by name.
            self.pending_schemas.lock().unwrap().insert(schema.name.clone(), schema);
            Ok(())
        }
    }

    pub fn remove_module(&self, name: &str) -> Result<(), SrError> {
        if self.active_sessions.load(Ordering::SeqCst) == 0 {
            self.materialize_remove(name)
        } else {
            self.deferred.lock().unwrap().push(DeferredOp::Remove { name: name.to_string() });
            Ok(())
        }
    }

    /// Toggles `feature` on `module`, deferred the same way install/remove
    /// are (§9 "Pending list of deferred operations" names feature toggle
    /// alongside install/remove explicitly).
    pub fn enable_feature(&self, module: &str, feature: &str) -> Result<(), SrError> {
        self.toggle_feature(module, feature, true)
    }

    pub fn disable_feature(&self, module: &str, feature: &str) -> Result<(), SrError> {
        self.toggle_feature(module, feature, false)
    }

    fn toggle_feature(&self, module: &str, feature: &str, enabled: bool) -> Result<(), SrError> {
        if self.active_sessions.load(Ordering::SeqCst) == 0 {
            self.materialize_feature_toggle(module, feature, enabled)
        } else {
            let op = if enabled {
                DeferredOp::EnableFeature {
                    module: module.to_string(),
                    feature: feature.to_string(),
                }
            } else {
                DeferredOp::DisableFeature {
                    module: module.to_string(),
                    feature: feature.to_string(),
                }
            };
            self.deferred.lock().unwrap().push(op);
            Ok(())
        }
    }

    fn materialize_feature_toggle(&self, module: &str, feature: &str, enabled: bool) -> Result<(), SrError> {
        let mut schema = self.schema.write().unwrap();
        let entry = schema.modules.get_mut(module).ok_or_else(|| SrError::UnknownModule(module.to_string()))?;
        entry.set_feature(feature, enabled);
        drop(schema);
        self.main_shm.lock().unwrap().bump_generation();
        Ok(())
    }

    fn materialize_install(&self, schema: ModuleSchema) -> Result<(), SrError> {
        let mut main = self.main_shm.lock().unwrap();
        let mut ext = self.ext_shm.lock().unwrap();
        main.install_module(&schema.name, &schema.revision, &mut ext)?;
        self.schema.write().unwrap().install(schema);
        Ok(())
    }

    fn materialize_remove(&self, name: &str) -> Result<(), SrError> {
        let mut main = self.main_shm.lock().unwrap();
        let ext = self.ext_shm.lock().unwrap();
        main.remove_module(name, &ext)?;
        self.schema.write().unwrap().modules.remove(name);
        Ok(())
    }

    /// Drains the deferred queue, materializing every queued schema change
    /// against a fresh generation. Called once `active_sessions` returns to
    /// zero.
    fn drain_deferred(&self) {
        let ops = self.deferred.lock().unwrap().drain();
        for op in ops {
            match op {
                DeferredOp::Install { name, .. } => {
                    if let Some(schema) = self.pending_schemas.lock().unwrap().remove(&name) {
                        if let Err(e) = self.materialize_install(schema) {
                            tracing::warn!(module = name, error = %e, "deferred install failed");
                        }
                    }
                }
                DeferredOp::Remove { name } => {
                    if let Err(e) = self.materialize_remove(&name) {
                        tracing::warn!(module = name, error = %e, "deferred remove failed");
                    }
                }
                DeferredOp::EnableFeature { module, feature } => {
                    if let Err(e) = self.materialize_feature_toggle(&module, &feature, true) {
                        tracing::warn!(module, feature, error = %e, "deferred enable-feature failed");
                    }
                }
                DeferredOp::DisableFeature { module, feature } => {
                    if let Err(e) = self.materialize_feature_toggle(&module, &feature, false) {
                        tracing::warn!(module, feature, error = %e, "deferred disable-feature failed");
                    }
                }
            }
        }
    }

    /// Opens a session against `kind`, pinning it to the connection's
    /// current schema generation (§3 Session invariant). Requires an
    /// `Arc<Connection>` since a session outlives any single call and
    /// shares ownership of the connection's state.
    pub fn start_session(self: &Arc<Connection>, kind: DatastoreKind, user: impl Into<String>) -> Result<Session, SrError> {
        Session::new(self.clone(), kind, user)
    }

    pub(crate) fn acquire_session_slot(&self) -> (u64, u64, u64) {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let nc_id = self.next_nc_id.fetch_add(1, Ordering::SeqCst);
        (session_id, nc_id, self.generation())
    }

    pub(crate) fn release_session_slot(&self) {
        if self.active_sessions.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drain_deferred();
        }
    }
}
