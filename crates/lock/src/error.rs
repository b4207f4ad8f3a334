#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum LockError {
    #[error("module is locked by another holder")]
    Locked,
    #[error("lock is in an inconsistent state after its holder died; clear it before retrying")]
    Inconsistent,
    #[error("the requested operation is not valid in the current lock state")]
    OperationFailed,
}
