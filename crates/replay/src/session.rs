//! Drives one subscription's replay state machine: deliver the historical
//! window in timestamp order, emit `replay_complete` on catch-up, then
//! either stop immediately (the requested `stop_time` has already passed)
//! or transition to forwarding real-time notifications until `stop_time`
//! is reached.

use crate::error::ReplayError;
use crate::log::{ReplayEntry, ReplayLog};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    Replay(ReplayEntry),
    ReplayComplete,
    Realtime(ReplayEntry),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Historical,
    Realtime,
    Stopped,
}

/// One subscriber's view of a module's replay log, from `start_time` to an
/// optional `stop_time`.
pub struct ReplaySession {
    stop_time: Option<i64>,
    phase: Phase,
}

impl ReplaySession {
    /// Opens a session and immediately drives the historical phase: every
    /// entry with `timestamp` in `[start_time, stop_time)` is delivered via
    /// `emit`, followed by one `ReplayComplete`. If `stop_time` is already
    /// in the past relative to `request_time`, a `Stop` follows immediately
    /// and the session is closed; otherwise it is left open for real-time
    /// delivery via [`ReplaySession::deliver_realtime`].
    pub fn open(
        log: &ReplayLog,
        start_time: i64,
        stop_time: Option<i64>,
        request_time: i64,
        mut emit: impl FnMut(ReplayEvent),
    ) -> Result<ReplaySession, ReplayError> {
        let historical = log.replay_iter(start_time, stop_time)?;
        for entry in historical {
            emit(ReplayEvent::Replay(entry));
        }
        emit(ReplayEvent::ReplayComplete);

        let mut session = ReplaySession {
            stop_time,
            phase: Phase::Realtime,
        };
        if let Some(stop) = stop_time {
            if stop <= request_time {
                session.phase = Phase::Stopped;
                emit(ReplayEvent::Stop);
            }
        }
        Ok(session)
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    /// Forwards one freshly-sent notification to a still-live session. A
    /// notification at or past `stop_time` ends the session with `Stop`
    /// instead of being delivered.
    pub fn deliver_realtime(&mut self, entry: ReplayEntry, mut emit: impl FnMut(ReplayEvent)) {
        if self.phase != Phase::Realtime {
            return;
        }
        if let Some(stop) = self.stop_time {
            if entry.timestamp >= stop {
                self.phase = Phase::Stopped;
                emit(ReplayEvent::Stop);
                return;
            }
        }
        emit(ReplayEvent::Realtime(entry));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_replay_window_then_complete_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ReplayLog::open(dir.path().join("m.notif")).unwrap();
        log.append(1, "/m:n", b"a").unwrap(); // t1
        log.append(2, "/m:n", b"b").unwrap(); // t2
        log.append(3, "/m:n", b"c").unwrap(); // t3

        let mut events = Vec::new();
        let session = ReplaySession::open(&log, 2, Some(3 + 1), 100, |e| events.push(e)).unwrap();
        assert!(session.is_stopped());

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ReplayEvent::Replay(ReplayEntry { timestamp: 2, .. })));
        assert!(matches!(events[1], ReplayEvent::Replay(ReplayEntry { timestamp: 3, .. })));
        assert_eq!(events[2], ReplayEvent::ReplayComplete);
        assert_eq!(events[3], ReplayEvent::Stop);
    }

    #[test]
    fn test_transitions_to_realtime_when_stop_time_unset() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path().join("m.notif")).unwrap();
        let mut events = Vec::new();
        let mut session = ReplaySession::open(&log, 0, None, 0, |e| events.push(e)).unwrap();
        assert!(!session.is_stopped());

        let mut realtime = Vec::new();
        session.deliver_realtime(
            ReplayEntry { timestamp: 5, xpath: "/m:n".into(), payload: vec![] },
            |e| realtime.push(e),
        );
        assert_eq!(realtime.len(), 1);
        assert!(matches!(realtime[0], ReplayEvent::Realtime(_)));
    }

    #[test]
    fn test_realtime_entry_past_stop_time_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path().join("m.notif")).unwrap();
        let mut events = Vec::new();
        let mut session = ReplaySession::open(&log, 0, Some(10), 0, |e| events.push(e)).unwrap();
        assert!(!session.is_stopped());

        let mut realtime = Vec::new();
        session.deliver_realtime(
            ReplayEntry { timestamp: 10, xpath: "/m:n".into(), payload: vec![] },
            |e| realtime.push(e),
        );
        assert!(session.is_stopped());
        assert_eq!(realtime, vec![ReplayEvent::Stop]);
    }
}
