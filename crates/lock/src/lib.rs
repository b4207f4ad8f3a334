//! The module lock table: per-module read/write/upgradable state plus the
//! session-scoped, non-reentrant `ds_lock`, writer-preference fairness, and
//! two owner-death detection paths — a robust, process-shared pthread
//! mutex where the OS supports it, and a lease-renewal fallback elsewhere.

pub mod error;
pub mod lease;
pub mod robust;
pub mod session;
pub mod table;

pub use error::LockError;
pub use lease::LeaseRegistry;
pub use robust::{LockOutcome, RobustError, RobustMutex};
pub use session::SessionId;
pub use table::{LockTable, ModuleLock};
