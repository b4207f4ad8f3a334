/// Identifies the session holding or requesting a lock. Opaque to this
/// crate beyond equality — callers mint these from their own session
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);
