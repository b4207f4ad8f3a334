//! Subscription identity and the per-kind callback shapes delivered by
//! [`crate::registry::Registry`].

use crate::flags::SubFlags;
use tree::{DiffEntry, Pointer, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKind {
    ModuleChange,
    OperationalGet,
    Rpc,
    Notification,
    YangPush,
}

/// The phase a module-change callback is being invoked for, mirroring the
/// five-phase commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleChangePhase {
    Update,
    Change,
    Done,
    Abort,
}

/// What a module-change callback decided for this phase. `Done`/`Abort`
/// phases only ever observe `Ok`/`Veto` for logging purposes — a veto
/// returned outside `Change` cannot roll back a transaction that has
/// already stored or already aborted, so `commit` only *acts* on vetoes
/// raised during `Change` and amendments raised during `Update`.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleChangeResult {
    Ok,
    /// Valid only during `Update`: a supplemental edit to merge into Δ
    /// before re-validation.
    Amend(tree::Children),
    /// Valid only during `Change`: vetoes the transaction.
    Veto(String),
}

pub type ModuleChangeCallback =
    dyn Fn(ModuleChangePhase, &[DiffEntry]) -> ModuleChangeResult + Send + Sync;

/// Appends this provider's contribution for its registered subtree.
/// Returns `None` if it has nothing to contribute for this read.
pub type OperationalCallback = dyn Fn() -> Option<tree::Node> + Send + Sync;

pub type RpcCallback = dyn Fn(&Tree) -> Result<Tree, String> + Send + Sync;

pub type NotificationCallback = dyn Fn(replay::ReplayEvent) + Send + Sync;

pub(crate) enum Callback {
    ModuleChange(Box<ModuleChangeCallback>),
    OperationalGet(Box<OperationalCallback>),
    Rpc(Box<RpcCallback>),
    Notification(Box<NotificationCallback>),
}

pub struct Subscription {
    pub handle: Handle,
    pub kind: SubKind,
    pub module: String,
    pub xpath: Option<Pointer>,
    pub priority: i32,
    pub flags: SubFlags,
    pub session: u64,
    pub(crate) registration_order: u64,
    pub(crate) callback: Callback,
}
