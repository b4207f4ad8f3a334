//! The event record carried in a Sub-SHM slot.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Update,
    Change,
    Done,
    Abort,
    Rpc,
    Notif,
    OperGet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: u64,
    pub kind: EventKind,
    pub module: String,
    pub priority: i32,
    pub payload_offset: u64,
    pub payload_len: u32,
    pub originator_session_id: u64,
    pub originator_nc_id: u64,
    pub request_timestamp: u64,
}
