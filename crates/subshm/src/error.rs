#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("no such event id {0} pending acknowledgment")]
    NoSuchEvent(u64),
    #[error("subscriber bit {0:#x} is not a member of the expected ack set for this event")]
    NotAMember(u64),
    #[error("timed out waiting for acks on event {event_id} ({acked:#x}/{expected:#x})")]
    Timeout {
        event_id: u64,
        acked: u64,
        expected: u64,
    },
    #[error("event {0} is stale: older than the subscriber's last acknowledged id")]
    Stale(u64),
}
