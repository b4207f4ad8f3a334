//! Sub-SHM: the circular event channel backing cross-process event
//! delivery for one `(module, subscription kind)` pair, with ack-bitmap
//! tracking, timeout-bounded waits, and event-id fencing for crash
//! recovery.

pub mod error;
pub mod event;
pub mod ring;

pub use error::RingError;
pub use event::{Event, EventKind};
pub use ring::SubShmRing;
