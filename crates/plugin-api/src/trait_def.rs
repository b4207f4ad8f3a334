//! The datastore plugin ABI: the boundary the core commit orchestrator
//! and facade call through to actually put bytes somewhere. Concrete
//! file/database plugins are explicitly out of scope; this is the
//! trait-object contract they implement.

use crate::error::{AccessMode, PluginError};
use tree::Tree;

/// Implemented once per concrete storage backend (file, database, pure
/// memory). Every method maps 1:1 onto the plugin ABI.
pub trait DatastorePlugin: Send + Sync {
    fn init(&self, module: &str) -> Result<(), PluginError>;
    fn destroy(&self, module: &str) -> Result<(), PluginError>;
    fn store(&self, module: &str, tree: &Tree) -> Result<(), PluginError>;
    fn load(&self, module: &str) -> Result<Tree, PluginError>;
    fn copy(&self, src_module: &str, dst_module: &str) -> Result<(), PluginError>;
    fn access_check(&self, module: &str, user: &str, mode: AccessMode) -> Result<bool, PluginError>;
    fn candidate_reset(&self, module: &str) -> Result<(), PluginError>;
    /// True if `running` has changed since the last `copy` from it — lets
    /// `copy_config(running -> startup)` skip the write when nothing
    /// changed, avoiding a redundant write when `running` is untouched.
    fn running_modified(&self, module: &str) -> Result<bool, PluginError>;
    fn notif_append(&self, module: &str, ts: i64, xpath: &str, payload: &[u8]) -> Result<(), PluginError>;
    fn notif_replay_iter(
        &self,
        module: &str,
        t0: i64,
        t1: Option<i64>,
    ) -> Result<Vec<replay::ReplayEntry>, PluginError>;
}
