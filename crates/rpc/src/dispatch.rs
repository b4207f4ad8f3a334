//! Synchronous RPC dispatch: a single call that posts an `rpc`
//! event on the target module's RPC Sub-SHM channel, invokes the highest
//! -priority subscriber registered for the path, and waits for its reply
//! through the same ack-bitmap machinery `commit` uses for module-change
//! events — the difference being the expected membership is always
//! exactly one bit, since only the highest-priority subscriber is ever
//! dispatched to.

use crate::error::RpcError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subshm::{EventKind, SubShmRing};
use subscribe::Registry;
use tree::{Pointer, SchemaContext, Tree};

const RPC_SINGLE_SUBSCRIBER_BIT: u64 = 1;

/// Dispatches one RPC call. `module` names the module owning `path`'s RPC
/// schema node; `schema`, if given, schema-validates both the input before
/// dispatch and the output before it is returned.
pub fn rpc_send(
    registry: &Registry,
    module: &str,
    path: &Pointer,
    input: Tree,
    schema: Option<&SchemaContext>,
    timeout: Duration,
) -> Result<Tree, RpcError> {
    if let Some(schema) = schema {
        tree::validate(&input, schema).map_err(RpcError::InvalidInput)?;
    }

    let handle = registry
        .rpc_subscriber(module, path)
        .ok_or_else(|| RpcError::NotFound(path.to_string()))?;

    let ring = SubShmRing::new(module.to_string(), EventKind::Rpc, 16);
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let event = ring.post(module.to_string(), 0, 0, 0, 0, 0, now, RPC_SINGLE_SUBSCRIBER_BIT);

    tracing::debug!(module, path = %path, event_id = event.event_id, "rpc dispatched");

    let result = registry
        .invoke_rpc(handle, &input)
        .ok_or_else(|| RpcError::CallbackFailed("subscriber vanished between lookup and invoke".into()))?;
    let _ = ring.ack(event.event_id, RPC_SINGLE_SUBSCRIBER_BIT);
    ring.wait_for_acks(event.event_id, timeout).map_err(|source| RpcError::Timeout { source })?;

    let output = result.map_err(RpcError::CallbackFailed)?;
    if let Some(schema) = schema {
        tree::validate(&output, schema).map_err(RpcError::InvalidOutput)?;
    }
    Ok(output)
}

#[cfg(test)]
mod test {
    use super::*;
    use tree::{Node, Value};

    #[test]
    fn test_no_subscriber_returns_not_found() {
        let registry = Registry::new();
        let path = Pointer::parse("/m:reboot").unwrap();
        let err = rpc_send(&registry, "m", &path, Tree::empty(1), None, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, RpcError::NotFound(_)));
    }

    #[test]
    fn test_dispatch_returns_subscriber_output() {
        let registry = Registry::new();
        let path = Pointer::parse("/m:reboot").unwrap();
        registry.subscribe_rpc(
            "m",
            path.clone(),
            0,
            1,
            Box::new(|_input| {
                let mut out = Tree::empty(1);
                out.root.upsert_child("m:status", Node::leaf(Value::String("ok".into())));
                Ok(out)
            }),
        );
        let output = rpc_send(&registry, "m", &path, Tree::empty(1), None, Duration::from_millis(50)).unwrap();
        assert_eq!(output.root.child("m:status"), Some(&Node::leaf(Value::String("ok".into()))));
    }

    #[test]
    fn test_callback_error_propagates() {
        let registry = Registry::new();
        let path = Pointer::parse("/m:reboot").unwrap();
        registry.subscribe_rpc("m", path.clone(), 0, 1, Box::new(|_| Err("busy".to_string())));
        let err = rpc_send(&registry, "m", &path, Tree::empty(1), None, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, RpcError::CallbackFailed(msg) if msg == "busy"));
    }

    #[test]
    fn test_highest_priority_subscriber_wins() {
        let registry = Registry::new();
        let path = Pointer::parse("/m:reboot").unwrap();
        registry.subscribe_rpc("m", path.clone(), 1, 1, Box::new(|_| Err("low".to_string())));
        registry.subscribe_rpc(
            "m",
            path.clone(),
            10,
            2,
            Box::new(|_| Ok(Tree::empty(1))),
        );
        let result = rpc_send(&registry, "m", &path, Tree::empty(1), None, Duration::from_millis(50));
        assert!(result.is_ok());
    }
}
