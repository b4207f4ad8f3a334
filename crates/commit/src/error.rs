use subscribe::Handle;

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("{} validation errors after the update-phase re-merge", .0.len())]
    Validation(Vec<tree::ValidationError>),
    #[error("module {module} is ds-locked by another session")]
    Locked { module: String },
    #[error("subscriber {subscriber:?} vetoed the change to module {module}: {message}")]
    Veto {
        module: String,
        subscriber: Handle,
        message: String,
    },
    #[error(transparent)]
    Lock(#[from] lock::LockError),
    #[error(transparent)]
    Plugin(#[from] plugin_api::PluginError),
    #[error("acknowledgement wait failed for module {module}, phase {phase:?}")]
    AckTimeout {
        module: String,
        phase: subshm::EventKind,
        #[source]
        source: subshm::RingError,
    },
    /// Promoted from a `system`-class failure between `store` and `done`:
    /// the orchestrator has already rolled the plugin back to its
    /// pre-transaction tree by the time this is returned.
    #[error("system error during commit, rolled back: {0}")]
    System(String),
}

impl From<edit::MergeAndDiffError> for CommitError {
    fn from(err: edit::MergeAndDiffError) -> CommitError {
        match err {
            edit::MergeAndDiffError::ValidationFailed(errors) => CommitError::Validation(errors),
            edit::MergeAndDiffError::Edit(e) => CommitError::System(e.to_string()),
        }
    }
}
