//! Portable liveness fallback for platforms without robust pthread
//! mutexes: every lock holder periodically renews a lease; a holder whose
//! lease has expired is treated the same as a robust-mutex owner-died
//! notification (see [`crate::robust`]).

use crate::session::SessionId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct LeaseRegistry {
    default_ttl: Duration,
    leases: HashMap<SessionId, Instant>,
}

impl LeaseRegistry {
    pub fn new(default_ttl: Duration) -> LeaseRegistry {
        LeaseRegistry {
            default_ttl,
            leases: HashMap::new(),
        }
    }

    pub fn renew(&mut self, session: SessionId) {
        self.leases.insert(session, Instant::now() + self.default_ttl);
    }

    pub fn release(&mut self, session: SessionId) {
        self.leases.remove(&session);
    }

    /// Returns true if `session` has renewed within its lease TTL (or has
    /// never registered a lease at all, which a caller should treat as
    /// "unknown, assume alive" rather than "dead").
    pub fn is_alive(&self, session: SessionId) -> bool {
        match self.leases.get(&session) {
            Some(expires_at) => Instant::now() < *expires_at,
            None => true,
        }
    }

    pub fn expired_sessions(&self) -> Vec<SessionId> {
        let now = Instant::now();
        self.leases
            .iter()
            .filter(|(_, expires_at)| now >= **expires_at)
            .map(|(session, _)| *session)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lease_expires_after_ttl() {
        let mut leases = LeaseRegistry::new(Duration::from_millis(1));
        let session = SessionId(1);
        leases.renew(session);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!leases.is_alive(session));
        assert_eq!(leases.expired_sessions(), vec![session]);
    }

    #[test]
    fn test_unknown_session_assumed_alive() {
        let leases = LeaseRegistry::new(Duration::from_secs(1));
        assert!(leases.is_alive(SessionId(99)));
    }
}
