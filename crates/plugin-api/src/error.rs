#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("module {0:?} has no bound plugin for this datastore")]
    NotFound(String),
    #[error("access denied for user {user:?} ({mode:?}) on module {module:?}")]
    Unauthorized { module: String, user: String, mode: AccessMode },
    #[error("plugin operation failed: {0}")]
    OperationFailed(String),
    #[error(transparent)]
    Replay(#[from] replay::ReplayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}
