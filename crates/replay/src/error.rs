#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to open replay log {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to replay log: {0}")]
    Append(#[source] std::io::Error),
    #[error("replay log {path} is truncated or corrupt at offset {offset}")]
    Corrupt { path: String, offset: u64 },
}
