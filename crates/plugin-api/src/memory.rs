//! `MemoryPlugin`: a reference, in-memory `DatastorePlugin` used by every
//! test in this workspace (and usable directly by a client program that
//! doesn't need real persistence) standing in for the concrete file or
//! database plugins are out of scope here.

use crate::error::{AccessMode, PluginError};
use crate::trait_def::DatastorePlugin;
use replay::{ReplayEntry, ReplayLog};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tree::Tree;

struct ModuleState {
    tree: Tree,
    /// Snapshot taken at the last `copy(running, _)`; compared by
    /// `running_modified` so `copy_config` can skip a no-op write.
    last_copied_from_running: Option<Tree>,
}

pub struct MemoryPlugin {
    notif_dir: PathBuf,
    modules: Mutex<HashMap<String, ModuleState>>,
    replay_logs: Mutex<HashMap<String, ReplayLog>>,
}

impl MemoryPlugin {
    /// `notif_dir` backs each module's append-only replay log; callers in
    /// tests typically point this at a `tempfile::tempdir()`.
    pub fn new(notif_dir: impl Into<PathBuf>) -> MemoryPlugin {
        MemoryPlugin {
            notif_dir: notif_dir.into(),
            modules: Mutex::new(HashMap::new()),
            replay_logs: Mutex::new(HashMap::new()),
        }
    }

    fn with_replay_log<T>(
        &self,
        module: &str,
        f: impl FnOnce(&mut ReplayLog) -> Result<T, PluginError>,
    ) -> Result<T, PluginError> {
        let mut logs = self.replay_logs.lock().unwrap();
        if !logs.contains_key(module) {
            let path = self.notif_dir.join(format!("{module}.notif"));
            let log = ReplayLog::open(path).map_err(PluginError::Replay)?;
            logs.insert(module.to_string(), log);
        }
        f(logs.get_mut(module).expect("just inserted"))
    }
}

impl DatastorePlugin for MemoryPlugin {
    fn init(&self, module: &str) -> Result<(), PluginError> {
        self.modules.lock().unwrap().entry(module.to_string()).or_insert_with(|| ModuleState {
            tree: Tree::empty(0),
            last_copied_from_running: None,
        });
        Ok(())
    }

    fn destroy(&self, module: &str) -> Result<(), PluginError> {
        self.modules.lock().unwrap().remove(module);
        Ok(())
    }

    fn store(&self, module: &str, tree: &Tree) -> Result<(), PluginError> {
        let mut modules = self.modules.lock().unwrap();
        let state = modules.entry(module.to_string()).or_insert_with(|| ModuleState {
            tree: Tree::empty(tree.generation),
            last_copied_from_running: None,
        });
        state.tree = tree.clone();
        Ok(())
    }

    fn load(&self, module: &str) -> Result<Tree, PluginError> {
        self.modules
            .lock()
            .unwrap()
            .get(module)
            .map(|s| s.tree.clone())
            .ok_or_else(|| PluginError::NotFound(module.to_string()))
    }

    fn copy(&self, src_module: &str, dst_module: &str) -> Result<(), PluginError> {
        let mut modules = self.modules.lock().unwrap();
        let src_tree = modules
            .get(src_module)
            .map(|s| s.tree.clone())
            .ok_or_else(|| PluginError::NotFound(src_module.to_string()))?;
        let dst = modules.entry(dst_module.to_string()).or_insert_with(|| ModuleState {
            tree: Tree::empty(src_tree.generation),
            last_copied_from_running: None,
        });
        dst.tree = src_tree.clone();
        dst.last_copied_from_running = Some(src_tree);
        Ok(())
    }

    fn access_check(&self, _module: &str, _user: &str, _mode: AccessMode) -> Result<bool, PluginError> {
        // The reference plugin grants everyone access; real access control
        // is NACM's decision function, modeled as an external collaborator
        // (out of scope here).
        Ok(true)
    }

    fn candidate_reset(&self, module: &str) -> Result<(), PluginError> {
        let mut modules = self.modules.lock().unwrap();
        if let Some(state) = modules.get_mut(module) {
            state.tree = Tree::empty(state.tree.generation);
        }
        Ok(())
    }

    fn running_modified(&self, module: &str) -> Result<bool, PluginError> {
        let modules = self.modules.lock().unwrap();
        let Some(state) = modules.get(module) else {
            return Ok(true);
        };
        Ok(match &state.last_copied_from_running {
            Some(snapshot) => snapshot != &state.tree,
            None => true,
        })
    }

    fn notif_append(&self, module: &str, ts: i64, xpath: &str, payload: &[u8]) -> Result<(), PluginError> {
        self.with_replay_log(module, |log| {
            log.append(ts, xpath, payload).map_err(PluginError::Replay)?;
            Ok(())
        })
    }

    fn notif_replay_iter(
        &self,
        module: &str,
        t0: i64,
        t1: Option<i64>,
    ) -> Result<Vec<ReplayEntry>, PluginError> {
        self.with_replay_log(module, |log| log.replay_iter(t0, t1).map_err(PluginError::Replay))
    }
}
