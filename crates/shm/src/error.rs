#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("failed to open shared memory file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to map shared memory: {0}")]
    Map(#[source] std::io::Error),
    #[error("failed to resize shared memory file: {0}")]
    Resize(#[source] std::io::Error),
    #[error("bad magic in MAIN-SHM header: expected {expected:#x}, found {found:#x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("MAIN-SHM header version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("module table is full: capacity {capacity}")]
    ModuleTableFull { capacity: u32 },
    #[error("no module named {0:?} is installed")]
    NoSuchModule(String),
    #[error("module {0:?} is already installed")]
    AlreadyInstalled(String),
    #[error("Ext-SHM offset {offset} + len {len} exceeds mapped length {mapped}")]
    OutOfBounds { offset: u64, len: u64, mapped: u64 },
    #[error(
        "generation changed from {observed} to {current} mid-read; retry against the new mapping"
    )]
    GenerationChanged { observed: u64, current: u64 },
}
