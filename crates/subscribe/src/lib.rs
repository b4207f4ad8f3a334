//! The in-process subscription registry (C7): who is listening for
//! module-change, operational-get, RPC, and notification events, in what
//! order they are delivered, and how operational-provider contributions
//! are stitched onto `running` to produce `operational` reads.

pub mod flags;
pub mod operational;
pub mod registry;
pub mod subscription;

pub use flags::SubFlags;
pub use operational::stitch_operational;
pub use registry::{bootstrap_creates, ModuleChangeHandle, Registry};
pub use subscription::{
    Handle, ModuleChangeCallback, ModuleChangePhase, ModuleChangeResult, NotificationCallback,
    OperationalCallback, RpcCallback, SubKind, Subscription,
};
