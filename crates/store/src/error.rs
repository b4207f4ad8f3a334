//! The unified error taxonomy of §7, exposed as a single `thiserror` enum
//! every public `Connection`/`Session` method returns, plus the
//! per-session `ErrorRecord` of §6 (cleared at the next operation, not at
//! error-read time).

/// §7's error code taxonomy, plus `context_changed` (SPEC_FULL.md §11 and
/// DESIGN.md's Open Question resolution): the spec's own list has no code
/// for "schema generation advanced mid-session", and collapsing it into
/// `operation_failed` would make the Session-invariant generative test of
/// §3 indistinguishable from an ordinary validation failure.
#[derive(Debug, thiserror::Error)]
pub enum SrError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    SchemaLibrary(#[from] tree::ParseError),
    #[error("system error: {0}")]
    System(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Exists(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("initialization failed: {0}")]
    InitFailed(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("bad element: {0}")]
    BadElement(String),
    #[error("{} validation errors", .0.len())]
    ValidationFailed(Vec<tree::ValidationError>),
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("locked: {0}")]
    Locked(String),
    #[error("timeout")]
    Timeout,
    #[error("subscriber callback failed: {0}")]
    CallbackFailed(String),
    /// The session's pinned schema generation is stale (§3 Session
    /// invariant): its staged edit has already been discarded by the
    /// caller by the time this is returned.
    #[error("schema generation advanced; session context is stale and its staged edit was discarded")]
    ContextChanged,
    #[error("ok")]
    Ok,
}

impl From<lock::LockError> for SrError {
    fn from(err: lock::LockError) -> SrError {
        match err {
            lock::LockError::Locked => SrError::Locked(err.to_string()),
            lock::LockError::Inconsistent => SrError::System(err.to_string()),
            lock::LockError::OperationFailed => SrError::OperationFailed(err.to_string()),
        }
    }
}

impl From<plugin_api::PluginError> for SrError {
    fn from(err: plugin_api::PluginError) -> SrError {
        match &err {
            plugin_api::PluginError::NotFound(m) => SrError::NotFound(m.clone()),
            plugin_api::PluginError::Unauthorized { .. } => SrError::Unauthorized(err.to_string()),
            plugin_api::PluginError::OperationFailed(_) => SrError::OperationFailed(err.to_string()),
            plugin_api::PluginError::Replay(_) => SrError::System(err.to_string()),
        }
    }
}

impl From<commit::CommitError> for SrError {
    fn from(err: commit::CommitError) -> SrError {
        match err {
            commit::CommitError::Validation(errors) => SrError::ValidationFailed(errors),
            commit::CommitError::Locked { module } => SrError::Locked(module),
            commit::CommitError::Veto { message, .. } => SrError::OperationFailed(message),
            commit::CommitError::Lock(e) => e.into(),
            commit::CommitError::Plugin(e) => e.into(),
            commit::CommitError::AckTimeout { .. } => SrError::Timeout,
            commit::CommitError::System(msg) => SrError::System(msg),
        }
    }
}

impl From<edit::EditError> for SrError {
    fn from(err: edit::EditError) -> SrError {
        match &err {
            edit::EditError::AlreadyExists(path) => SrError::Exists(path.clone()),
            edit::EditError::NotFound(path) => SrError::NotFound(path.clone()),
            edit::EditError::MissingParent(_) | edit::EditError::BadPath(_) => {
                SrError::InvalidArgument(err.to_string())
            }
            edit::EditError::NotUserOrdered | edit::EditError::MissingAnchor => {
                SrError::InvalidArgument(err.to_string())
            }
            edit::EditError::Merge(_) => SrError::BadElement(err.to_string()),
        }
    }
}

impl From<edit::MergeAndDiffError> for SrError {
    fn from(err: edit::MergeAndDiffError) -> SrError {
        match err {
            edit::MergeAndDiffError::ValidationFailed(errors) => SrError::ValidationFailed(errors),
            edit::MergeAndDiffError::Edit(e) => e.into(),
        }
    }
}

impl From<rpc::RpcError> for SrError {
    fn from(err: rpc::RpcError) -> SrError {
        match err {
            rpc::RpcError::NotFound(path) => SrError::NotFound(path),
            rpc::RpcError::InvalidInput(errors) | rpc::RpcError::InvalidOutput(errors) => {
                SrError::ValidationFailed(errors)
            }
            rpc::RpcError::CallbackFailed(msg) => SrError::CallbackFailed(msg),
            rpc::RpcError::Timeout { .. } => SrError::Timeout,
        }
    }
}

impl From<shm::ShmError> for SrError {
    fn from(err: shm::ShmError) -> SrError {
        SrError::System(err.to_string())
    }
}

/// One offending `(message, xpath)` pair in an `ErrorRecord` (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEntry {
    pub message: String,
    pub xpath: Option<String>,
}

/// Per-session error record, cleared at the next operation's start rather
/// than when read (§6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorRecord {
    pub entries: Vec<ErrorEntry>,
}

impl ErrorRecord {
    pub fn from_error(err: &SrError) -> ErrorRecord {
        let entries = match err {
            SrError::ValidationFailed(errors) => errors
                .iter()
                .map(|e| ErrorEntry {
                    message: e.message.clone(),
                    xpath: Some(e.xpath.clone()),
                })
                .collect(),
            other => vec![ErrorEntry {
                message: other.to_string(),
                xpath: None,
            }],
        };
        ErrorRecord { entries }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
