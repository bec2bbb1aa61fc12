//! Replicating participant
//!
//! Message flow, open replication (transitive interest skips the id lists):
//!
//! ```text
//! initiator                     responder
//!     | ---------- Ids ----------> |   merge ids
//!     | <--------- Ids ----------- |
//!     | ------- Frontier --------> |
//!     | <------ Frontier --------- |
//!     | <-------- News ----------- |
//!     | --------- News ----------> |
//! ```

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};

use scuttle_core::{
    Content, Event, FeedId, Frontier, GossipConfig, News, RelayId, ScuttleError, ScuttleResult,
    Tick,
};
use scuttle_crypto::{open_content, seal_content, Identity};
use scuttle_store::{InterestPolicy, Store, UpdateReport};
use scuttle_wire::{Packet, ProtocolMessage};

use crate::{ReplicationSession, Role};

/// Replicated content handed to the application, once per event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub feed: FeedId,
    pub index: u64,
    pub content: Content,
}

/// A protocol message to send to one peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub to: RelayId,
    /// Set when we opened the session
    pub initiator: bool,
    pub message: ProtocolMessage,
}

impl Outgoing {
    pub fn into_packet(self) -> Packet {
        Packet::Session {
            to: self.to,
            initiator: self.initiator,
            message: self.message,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GossipStats {
    pub sessions_opened: u64,
    pub sessions_completed: u64,
    pub sessions_abandoned: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub unexpected_messages: u64,
    pub events_published: u64,
    pub events_replicated: u64,
    pub events_rejected: u64,
    pub events_delivered: u64,
}

/// One peer of the replication layer
pub struct Participant {
    identity: Identity,
    store: Store,
    interest: InterestPolicy,
    sessions: BTreeMap<(RelayId, Role), ReplicationSession>,
    /// Highest index per feed already handed to the application
    delivered: BTreeMap<FeedId, u64>,
    deliveries: Vec<Delivery>,
    session_timeout: u64,
    stats: GossipStats,
}

impl Participant {
    pub fn new(identity: Identity, config: &GossipConfig) -> Self {
        let feed = identity.feed_id();
        Participant {
            store: Store::new(feed),
            interest: InterestPolicy::new(config.interest, feed, config.block_policy),
            identity,
            sessions: BTreeMap::new(),
            delivered: BTreeMap::new(),
            deliveries: Vec::new(),
            session_timeout: config.session_timeout,
            stats: GossipStats::default(),
        }
    }

    pub fn feed_id(&self) -> FeedId {
        self.identity.feed_id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn interest(&self) -> &InterestPolicy {
        &self.interest
    }

    pub fn stats(&self) -> &GossipStats {
        &self.stats
    }

    pub fn session(&self, peer: RelayId, role: Role) -> Option<&ReplicationSession> {
        self.sessions.get(&(peer, role))
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// True while any session with `peer` is running, in either role
    pub fn in_session_with(&self, peer: RelayId) -> bool {
        self.sessions.keys().any(|(p, _)| *p == peer)
    }

    /// Append content to our own feed
    pub fn publish(&mut self, content: Content) -> Event {
        let event = self.store.append_local(content, &self.identity);
        self.stats.events_published += 1;
        if event.is_interest() {
            self.interest.prepare_store(&mut self.store);
        }
        tracing::trace!(feed = ?event.author, index = event.index, "published");
        event
    }

    pub fn follow(&mut self, feed: FeedId) -> Event {
        self.publish(Content::Follow(feed))
    }

    pub fn unfollow(&mut self, feed: FeedId) -> Event {
        self.publish(Content::Unfollow(feed))
    }

    pub fn block(&mut self, feed: FeedId) -> Event {
        self.publish(Content::Block(feed))
    }

    pub fn unblock(&mut self, feed: FeedId) -> Event {
        self.publish(Content::Unblock(feed))
    }

    /// Publish a payload only `recipient` can read
    ///
    /// The ephemeral sealing key comes from `rng`; a seeded generator makes
    /// the resulting event reproducible.
    pub fn publish_private<R: CryptoRng + RngCore>(
        &mut self,
        recipient: FeedId,
        plaintext: &[u8],
        rng: &mut R,
    ) -> ScuttleResult<Event> {
        let content = seal_content(recipient, plaintext, rng)?;
        Ok(self.publish(content))
    }

    /// Read sealed content addressed to us
    pub fn open_private(&self, content: &Content) -> ScuttleResult<Vec<u8>> {
        open_content(&self.identity, content)
    }

    /// Take everything queued for the application
    pub fn drain_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.deliveries)
    }

    /// Open a session with `peer`, unless one we started is still running
    pub fn initiate(&mut self, peer: RelayId, now: Tick) -> Option<Outgoing> {
        if self.sessions.contains_key(&(peer, Role::Initiator)) {
            return None;
        }
        let mut session = ReplicationSession::new(peer, Role::Initiator, now);
        let message = match self.interest {
            InterestPolicy::Open => ProtocolMessage::Ids(self.store.ids()),
            InterestPolicy::Transitive(_) => {
                self.interest.prepare_store(&mut self.store);
                let frontier = self.store.full_frontier();
                session.record_frontier_sent(frontier.clone(), now);
                ProtocolMessage::Frontier(frontier)
            }
        };
        self.sessions.insert((peer, Role::Initiator), session);
        self.stats.sessions_opened += 1;
        tracing::debug!(peer = %peer, "session opened");
        Some(self.outgoing(peer, Role::Initiator, message))
    }

    /// Handle one protocol message from `from`
    pub fn handle(
        &mut self,
        from: RelayId,
        sender_initiated: bool,
        message: ProtocolMessage,
        now: Tick,
    ) -> Vec<Outgoing> {
        self.stats.messages_received += 1;
        let role = Role::from_sender(sender_initiated);

        let result = match (message, role) {
            (ProtocolMessage::Ids(ids), Role::Responder) => {
                // A fresh hello restarts whatever we had with this initiator
                self.sessions
                    .insert((from, role), ReplicationSession::new(from, role, now));
                self.interest.discover(&mut self.store, ids);
                Ok(vec![self.outgoing(from, role, ProtocolMessage::Ids(self.store.ids()))])
            }
            (ProtocolMessage::Ids(ids), Role::Initiator) => self.on_ids_reply(from, ids, now),
            (ProtocolMessage::Frontier(frontier), Role::Responder) => {
                Ok(self.on_initiator_frontier(from, frontier, now))
            }
            (ProtocolMessage::Frontier(frontier), Role::Initiator) => {
                self.on_responder_frontier(from, frontier, now)
            }
            (ProtocolMessage::News(news), role) => self.on_news(from, role, news, now),
        };

        match result {
            Ok(replies) => replies,
            Err(err) => {
                self.stats.unexpected_messages += 1;
                tracing::debug!(peer = %from, error = %err, "ignored message");
                Vec::new()
            }
        }
    }

    fn on_ids_reply(
        &mut self,
        from: RelayId,
        ids: std::collections::BTreeSet<FeedId>,
        now: Tick,
    ) -> ScuttleResult<Vec<Outgoing>> {
        let key = (from, Role::Initiator);
        match self.sessions.get(&key) {
            Some(session) if session.sent_frontier().is_none() => {}
            _ => return Err(unexpected(from, "ids")),
        }
        self.interest.discover(&mut self.store, ids);
        let frontier = self.store.full_frontier();
        if let Some(session) = self.sessions.get_mut(&key) {
            session.record_frontier_sent(frontier.clone(), now);
        }
        Ok(vec![self.outgoing(
            from,
            Role::Initiator,
            ProtocolMessage::Frontier(frontier),
        )])
    }

    fn on_initiator_frontier(&mut self, from: RelayId, peer: Frontier, now: Tick) -> Vec<Outgoing> {
        let key = (from, Role::Responder);
        let restart = self
            .sessions
            .get(&key)
            .map_or(true, |session| session.sent_frontier().is_some());
        if restart {
            self.sessions
                .insert(key, ReplicationSession::new(from, Role::Responder, now));
        }

        self.interest.discover(&mut self.store, peer.feeds());
        self.interest.prepare_store(&mut self.store);
        let frontier = self.store.full_frontier();
        let news = self.store.events_since(&peer);

        if let Some(session) = self.sessions.get_mut(&key) {
            session.record_frontier_sent(frontier.clone(), now);
            session.record_news_sent(now);
        }
        vec![
            self.outgoing(from, Role::Responder, ProtocolMessage::Frontier(frontier)),
            self.outgoing(from, Role::Responder, ProtocolMessage::News(news)),
        ]
    }

    fn on_responder_frontier(
        &mut self,
        from: RelayId,
        peer: Frontier,
        now: Tick,
    ) -> ScuttleResult<Vec<Outgoing>> {
        let key = (from, Role::Initiator);
        match self.sessions.get(&key) {
            Some(session) if session.sent_frontier().is_some() => {}
            _ => return Err(unexpected(from, "frontier")),
        }

        self.interest.discover(&mut self.store, peer.feeds());
        let news = self.store.events_since(&peer);
        if let Some(session) = self.sessions.get_mut(&key) {
            session.record_news_sent(now);
        }
        let reply = self.outgoing(from, Role::Initiator, ProtocolMessage::News(news));
        self.close_if_done(key);
        Ok(vec![reply])
    }

    fn on_news(
        &mut self,
        from: RelayId,
        role: Role,
        news: News,
        now: Tick,
    ) -> ScuttleResult<Vec<Outgoing>> {
        let key = (from, role);
        let sent = match self.sessions.get(&key).and_then(|s| s.sent_frontier()) {
            Some(frontier) => frontier.clone(),
            None => return Err(unexpected(from, "news")),
        };

        let accepted: News = news
            .into_iter()
            .filter(|(feed, _)| sent.contains(feed))
            .collect();
        let report = self.store.update(accepted);
        self.absorb(&report);

        for feed in report.appended.keys() {
            self.interest.observe(&self.store, feed);
        }
        for (feed, &index) in &sent {
            self.deliver_new(feed, index);
        }
        self.interest.prepare_store(&mut self.store);

        if let Some(session) = self.sessions.get_mut(&key) {
            session.record_news_received(now);
        }
        self.close_if_done(key);
        Ok(Vec::new())
    }

    /// An event pushed by its author outside any session
    pub fn on_publish(&mut self, event: Event) {
        let feed = event.author;
        if feed == self.feed_id() {
            return;
        }
        self.interest.discover(&mut self.store, [feed]);
        if !self.store.contains(&feed) {
            return;
        }

        let index = event.index;
        let mut news = News::new();
        news.insert(feed, vec![event]);
        let report = self.store.update(news);
        self.absorb(&report);

        if report.appended.contains_key(&feed) {
            self.interest.observe(&self.store, &feed);
            self.deliver_new(&feed, index.saturating_sub(1));
            self.interest.prepare_store(&mut self.store);
        }
    }

    /// Drop every session with a peer that went away
    pub fn abandon(&mut self, peer: RelayId) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|(p, _), _| *p != peer);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            self.stats.sessions_abandoned += dropped as u64;
            tracing::debug!(error = %ScuttleError::SessionAbandoned(peer), "session dropped");
        }
        dropped
    }

    /// Abandon sessions that have been silent past the timeout
    pub fn expire_sessions(&mut self, now: Tick) -> Vec<RelayId> {
        let timeout = self.session_timeout;
        let idle: Vec<(RelayId, Role)> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_idle(now, timeout))
            .map(|(key, _)| *key)
            .collect();

        for key in &idle {
            self.sessions.remove(key);
            self.stats.sessions_abandoned += 1;
            tracing::debug!(error = %ScuttleError::SessionAbandoned(key.0), "session timed out");
        }
        idle.into_iter().map(|(peer, _)| peer).collect()
    }

    fn outgoing(&mut self, to: RelayId, role: Role, message: ProtocolMessage) -> Outgoing {
        self.stats.messages_sent += 1;
        Outgoing {
            to,
            initiator: role.is_initiator(),
            message,
        }
    }

    fn close_if_done(&mut self, key: (RelayId, Role)) {
        if self.sessions.get(&key).is_some_and(ReplicationSession::is_closed) {
            self.sessions.remove(&key);
            self.stats.sessions_completed += 1;
            tracing::debug!(peer = %key.0, role = ?key.1, "session complete");
        }
    }

    fn absorb(&mut self, report: &UpdateReport) {
        self.stats.events_replicated += report.total_appended();
        self.stats.events_rejected += report.rejected.len() as u64;
        for error in report.errors() {
            tracing::debug!(%error, "news not applied");
        }
    }

    /// Queue for the application every event of `feed` past both `floor`
    /// and what was already delivered
    fn deliver_new(&mut self, feed: &FeedId, floor: u64) {
        if *feed == self.feed_id() {
            return;
        }
        let Some(log) = self.store.log(feed) else {
            return;
        };
        let watermark = self.delivered.entry(*feed).or_insert(0);
        let start = floor.max(*watermark);
        for event in log.since(start) {
            if !event.is_interest() {
                self.deliveries.push(Delivery {
                    feed: *feed,
                    index: event.index,
                    content: event.content.clone(),
                });
                self.stats.events_delivered += 1;
            }
        }
        *watermark = (*watermark).max(log.last_index());
    }
}

fn unexpected(peer: RelayId, message: &'static str) -> ScuttleError {
    ScuttleError::UnexpectedMessage { peer, message }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("feed", &self.identity.feed_id())
            .field("feeds", &self.store.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
