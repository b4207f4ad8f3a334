//! The replay log: an append-only per-module notification store with a
//! timestamp index, plus the subscription-side state machine that replays
//! a historical window and then forwards real-time notifications until an
//! optional stop time is reached.

pub mod error;
pub mod log;
pub mod session;

pub use error::ReplayError;
pub use log::{ReplayEntry, ReplayLog};
pub use session::{ReplayEvent, ReplaySession};
