//! Replication session state

use scuttle_core::{Frontier, RelayId, Tick};

/// Which side of a session we are
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// Our role given whether the peer's message came from the initiator
    pub fn from_sender(sender_initiated: bool) -> Self {
        if sender_initiated {
            Role::Responder
        } else {
            Role::Initiator
        }
    }

    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }
}

/// Furthest step this side has sent
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    HelloSent,
    FrontierSent,
    NewsSent,
    Closed,
}

/// One reconciliation with one peer
#[derive(Clone, Debug)]
pub struct ReplicationSession {
    peer: RelayId,
    role: Role,
    phase: SessionPhase,
    /// Frontier we sent; the news we accept is limited to its feeds
    sent_frontier: Option<Frontier>,
    news_sent: bool,
    news_received: bool,
    opened_at: Tick,
    last_activity: Tick,
}

impl ReplicationSession {
    pub fn new(peer: RelayId, role: Role, now: Tick) -> Self {
        ReplicationSession {
            peer,
            role,
            phase: SessionPhase::HelloSent,
            sent_frontier: None,
            news_sent: false,
            news_received: false,
            opened_at: now,
            last_activity: now,
        }
    }

    pub fn peer(&self) -> RelayId {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn sent_frontier(&self) -> Option<&Frontier> {
        self.sent_frontier.as_ref()
    }

    pub fn opened_at(&self) -> Tick {
        self.opened_at
    }

    pub fn touch(&mut self, now: Tick) {
        self.last_activity = self.last_activity.max(now);
    }

    pub fn record_frontier_sent(&mut self, frontier: Frontier, now: Tick) {
        self.sent_frontier = Some(frontier);
        self.phase = self.phase.max(SessionPhase::FrontierSent);
        self.touch(now);
    }

    pub fn record_news_sent(&mut self, now: Tick) {
        self.news_sent = true;
        self.phase = self.phase.max(SessionPhase::NewsSent);
        self.touch(now);
        self.close_if_done();
    }

    pub fn record_news_received(&mut self, now: Tick) {
        self.news_received = true;
        self.touch(now);
        self.close_if_done();
    }

    fn close_if_done(&mut self) {
        if self.news_sent && self.news_received {
            self.phase = SessionPhase::Closed;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// No message for longer than `timeout` ticks
    pub fn is_idle(&self, now: Tick, timeout: u64) -> bool {
        now.since(self.last_activity) > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_sender() {
        assert_eq!(Role::from_sender(true), Role::Responder);
        assert_eq!(Role::from_sender(false), Role::Initiator);
        assert!(Role::Initiator.is_initiator());
    }

    #[test]
    fn test_session_closes_after_news_both_ways() {
        let mut session = ReplicationSession::new(RelayId::new(2), Role::Initiator, Tick(0));
        assert_eq!(session.phase(), SessionPhase::HelloSent);

        session.record_frontier_sent(Frontier::new(), Tick(1));
        assert_eq!(session.phase(), SessionPhase::FrontierSent);
        assert!(session.sent_frontier().is_some());

        session.record_news_received(Tick(2));
        assert!(!session.is_closed());

        session.record_news_sent(Tick(2));
        assert!(session.is_closed());
    }

    #[test]
    fn test_idle_detection() {
        let mut session = ReplicationSession::new(RelayId::new(2), Role::Responder, Tick(10));
        assert!(!session.is_idle(Tick(15), 5));
        assert!(session.is_idle(Tick(16), 5));

        session.touch(Tick(14));
        assert!(!session.is_idle(Tick(16), 5));
    }
}
