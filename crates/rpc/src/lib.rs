//! Synchronous RPC dispatch: a request writes an `rpc` event
//! into the target module's RPC Sub-SHM channel and blocks for the single
//! highest-priority subscriber registered for the path to reply.

pub mod dispatch;
pub mod error;

pub use dispatch::rpc_send;
pub use error::RpcError;
