//! Connection configuration: the ambient configuration-layer concern
//! left unsaid ("packaging" is scoped out; it never says how a
//! client actually points at a SHM prefix or chooses a commit timeout) but
//! a usable connection API needs, `serde`+`schemars`-annotated per the
//! teacher's `models` crate convention.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where this connection's shared-memory regions live and how long its
/// commits wait for subscriber acknowledgements, per §4.1/§4.4.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding `main.shm`, `ext.shm`, and per-module replay logs.
    /// Varying this across test instances is how the workspace gets
    /// isolated parallel "processes" without a real multi-host setup.
    pub shm_prefix: String,
    /// §4.4 default ack-wait timeout before a phase converts to abort.
    #[serde(with = "humantime_serde", default = "default_commit_timeout")]
    pub commit_timeout: Duration,
    /// Process uid allowed to elevate a session's effective user (§6
    /// Access: "Elevating a session's user requires the process to be
    /// running as the configured superuser id").
    pub superuser_uid: u32,
    /// Initial MAIN-SHM module table capacity; growing past this requires
    /// a generation-swap compaction (§4.1), so callers that expect many
    /// modules should size it generously up front.
    #[serde(default = "default_module_capacity")]
    pub module_capacity: u32,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_commit_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_module_capacity() -> u32 {
    64
}

impl StoreConfig {
    pub fn new(shm_prefix: impl Into<String>, superuser_uid: u32) -> StoreConfig {
        StoreConfig {
            shm_prefix: shm_prefix.into(),
            commit_timeout: default_commit_timeout(),
            superuser_uid,
            module_capacity: default_module_capacity(),
            log: LogConfig::default(),
        }
    }

    pub fn main_shm_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.shm_prefix).join("main.shm")
    }

    pub fn ext_shm_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.shm_prefix).join("ext.shm")
    }

    pub fn replay_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.shm_prefix).join("notif")
    }
}

/// The five severities and sink set of §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    None,
    #[default]
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Any combination of sinks may be enabled simultaneously (§6).
    pub stderr: bool,
    pub syslog: bool,
    /// A user callback sink is configured programmatically via
    /// [`crate::logging::init`], not through this serializable struct.
    #[serde(skip)]
    pub user_callback: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_roundtrips_through_yaml() {
        let config = StoreConfig::new("/tmp/sr-test", 0);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: StoreConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.shm_prefix, config.shm_prefix);
        assert_eq!(back.superuser_uid, config.superuser_uid);
    }

    #[test]
    fn test_paths_are_under_prefix() {
        let config = StoreConfig::new("/tmp/sr-test", 0);
        assert_eq!(config.main_shm_path(), std::path::Path::new("/tmp/sr-test/main.shm"));
        assert_eq!(config.ext_shm_path(), std::path::Path::new("/tmp/sr-test/ext.shm"));
    }
}
