#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("no subscriber registered for rpc path {0}")]
    NotFound(String),
    #[error("{} validation errors in rpc input", .0.len())]
    InvalidInput(Vec<tree::ValidationError>),
    #[error("{} validation errors in rpc output", .0.len())]
    InvalidOutput(Vec<tree::ValidationError>),
    #[error("rpc subscriber callback failed: {0}")]
    CallbackFailed(String),
    #[error("timed out waiting for rpc subscriber to reply")]
    Timeout {
        #[source]
        source: subshm::RingError,
    },
}
