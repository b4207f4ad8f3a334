//! A circular event channel for one `(module, subscription kind)` pair:
//! producers post events, subscribers consume and acknowledge them, and a
//! producer can block (with a timeout) until every expected subscriber has
//! acked. Event-id fencing lets a subscriber ignore an event it has
//! somehow seen again after already acking a newer one.

use crate::error::RingError;
use crate::event::{Event, EventKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

struct PendingAck {
    /// Bitmask of subscriber slots expected to acknowledge this event.
    expected: u64,
    acked: u64,
}

struct RingState {
    capacity: usize,
    slots: VecDeque<Event>,
    next_event_id: u64,
    pending: HashMap<u64, PendingAck>,
    /// Subscriber bits observed not to have acked by their deadline at
    /// least once; cleared when they next ack promptly.
    unresponsive: u64,
}

pub struct SubShmRing {
    pub module: String,
    pub kind: EventKind,
    state: Mutex<RingState>,
    cond: Condvar,
}

impl SubShmRing {
    pub fn new(module: impl Into<String>, kind: EventKind, capacity: usize) -> SubShmRing {
        SubShmRing {
            module: module.into(),
            kind,
            state: Mutex::new(RingState {
                capacity,
                slots: VecDeque::with_capacity(capacity),
                next_event_id: 1,
                pending: HashMap::new(),
                unresponsive: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Posts an event, assigning it the next monotonic event id, and
    /// registers the set of subscriber bits expected to ack it. Evicts the
    /// oldest slot if the ring is at capacity.
    pub fn post(
        &self,
        module: String,
        priority: i32,
        payload_offset: u64,
        payload_len: u32,
        originator_session_id: u64,
        originator_nc_id: u64,
        request_timestamp: u64,
        expected_acks: u64,
    ) -> Event {
        let mut state = self.state.lock().unwrap();
        let event_id = state.next_event_id;
        state.next_event_id += 1;
        let event = Event {
            event_id,
            kind: self.kind,
            module,
            priority,
            payload_offset,
            payload_len,
            originator_session_id,
            originator_nc_id,
            request_timestamp,
        };
        if state.slots.len() == state.capacity {
            state.slots.pop_front();
        }
        state.slots.push_back(event.clone());
        if expected_acks != 0 {
            state.pending.insert(
                event_id,
                PendingAck {
                    expected: expected_acks,
                    acked: 0,
                },
            );
        }
        trace!(module = %self.module, event_id, ?self.kind, "posted event");
        event
    }

    pub fn ack(&self, event_id: u64, subscriber_bit: u64) -> Result<(), RingError> {
        let mut state = self.state.lock().unwrap();
        let pending = state
            .pending
            .get_mut(&event_id)
            .ok_or(RingError::NoSuchEvent(event_id))?;
        if pending.expected & subscriber_bit == 0 {
            return Err(RingError::NotAMember(subscriber_bit));
        }
        pending.acked |= subscriber_bit;
        state.unresponsive &= !subscriber_bit;
        self.cond.notify_all();
        Ok(())
    }

    /// Blocks until every expected subscriber has acked `event_id`, or
    /// `timeout` elapses. On timeout, every subscriber bit that had not
    /// yet acked is marked unresponsive (queryable via
    /// [`SubShmRing::unresponsive_subscribers`]) and a `Timeout` error is
    /// returned so the caller can convert the commit to an abort.
    pub fn wait_for_acks(&self, event_id: u64, timeout: Duration) -> Result<(), RingError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            let (expected, acked) = {
                let pending = state
                    .pending
                    .get(&event_id)
                    .ok_or(RingError::NoSuchEvent(event_id))?;
                (pending.expected, pending.acked)
            };
            if acked == expected {
                state.pending.remove(&event_id);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                let missing = expected & !acked;
                state.unresponsive |= missing;
                warn!(module = %self.module, event_id, missing = format!("{missing:#x}"), "ack wait timed out");
                return Err(RingError::Timeout {
                    event_id,
                    acked,
                    expected,
                });
            }
            let (g, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = g;
        }
    }

    pub fn unresponsive_subscribers(&self) -> u64 {
        self.state.lock().unwrap().unresponsive
    }

    pub fn clear_unresponsive(&self, subscriber_bit: u64) {
        self.state.lock().unwrap().unresponsive &= !subscriber_bit;
    }

    /// Event-id fencing: a subscriber should discard an event older than
    /// the last one it acknowledged.
    pub fn is_stale(&self, event_id: u64, subscriber_last_acked: u64) -> bool {
        event_id < subscriber_last_acked
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().slots.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn post_with_members(ring: &SubShmRing, expected: u64) -> Event {
        ring.post("m".into(), 0, 0, 0, 1, 0, 0, expected)
    }

    #[test]
    fn test_ack_fills_and_wait_returns() {
        let ring = SubShmRing::new("m", EventKind::Change, 8);
        let event = post_with_members(&ring, 0b011);
        ring.ack(event.event_id, 0b001).unwrap();
        ring.ack(event.event_id, 0b010).unwrap();
        ring.wait_for_acks(event.event_id, Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn test_timeout_marks_unresponsive() {
        let ring = SubShmRing::new("m", EventKind::Change, 8);
        let event = post_with_members(&ring, 0b011);
        ring.ack(event.event_id, 0b001).unwrap();
        let err = ring.wait_for_acks(event.event_id, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, RingError::Timeout { .. }));
        assert_eq!(ring.unresponsive_subscribers(), 0b010);
    }

    #[test]
    fn test_ack_by_non_member_rejected() {
        let ring = SubShmRing::new("m", EventKind::Change, 8);
        let event = post_with_members(&ring, 0b001);
        let err = ring.ack(event.event_id, 0b100).unwrap_err();
        assert!(matches!(err, RingError::NotAMember(_)));
    }

    #[test]
    fn test_ring_evicts_oldest_past_capacity() {
        let ring = SubShmRing::new("m", EventKind::Notif, 2);
        post_with_members(&ring, 0);
        post_with_members(&ring, 0);
        post_with_members(&ring, 0);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_stale_event_fencing() {
        let ring = SubShmRing::new("m", EventKind::Notif, 4);
        assert!(ring.is_stale(3, 5));
        assert!(!ring.is_stale(6, 5));
    }
}
