//! Public facade over the whole workspace: `Connection`/`Session`, the
//! datastore kinds, the unified `SrError` taxonomy, `StoreConfig`, and
//! `tracing`-backed logging sink selection. Every other crate in the
//! workspace is an implementation detail reachable only through this one.

pub mod config;
pub mod connection;
pub mod datastore;
pub mod error;
pub mod logging;
pub mod session;

pub use config::{LogConfig, LogLevel, StoreConfig};
pub use connection::Connection;
pub use datastore::DatastoreKind;
pub use error::{ErrorEntry, ErrorRecord, SrError};
pub use session::Session;

pub use edit::{EditOpts, Position};
pub use lock::SessionId;
pub use plugin_api::{AccessMode, DatastorePlugin, MemoryPlugin};
pub use subscribe::{Handle, ModuleChangePhase, ModuleChangeResult, SubFlags};
pub use tree::{Children, Node, Op, OpMap, Pointer, Tree, Value};

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_open_connection_and_session_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("shm").to_str().unwrap(), 0);
        let plugin = Arc::new(MemoryPlugin::new(dir.path().join("notif")));
        let connection = Arc::new(Connection::open(config, plugin).unwrap());

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

        let mut session = connection.start_session(DatastoreKind::Running, "alice").unwrap();
        let path = Pointer::parse("/m:flag").unwrap();
        session.set(&path, Value::Bool(true), EditOpts::default()).unwrap();
        session.apply_changes().unwrap();
        assert_eq!(session.get(&path).unwrap(), Some(Value::Bool(true)));
    }
}
