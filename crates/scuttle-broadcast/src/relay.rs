//! Broadcast relay
//!
//! A relay floods waves to its neighbors and hands them to the hosted
//! replication participant in per-source sequence order. Out-of-order
//! waves wait in a per-source buffer; gaps are pulled from neighbors with
//! ARQ requests, answered from the transport log of accepted waves.
//!
//! Besides replication traffic a relay carries addressed application
//! payloads: direct messages for one relay and topic messages for its
//! subscribers. Every relay floods and retransmits them alike; only the
//! addressee hands them up.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use scuttle_core::{
    Content, Event, FeedId, RelayConfig, RelayId, ScuttleError, ScuttleResult,
    SimulationContext, Tick, TopicId,
};
use scuttle_gossip::Participant;
use scuttle_wire::Packet;

use crate::{Address, AppMessage, ArqRequest, Transmission, Wave};

/// Relay statistics
#[derive(Clone, Debug, Default)]
pub struct RelayStats {
    pub originated: u64,
    pub received: u64,
    pub accepted: u64,
    pub buffered: u64,
    pub duplicates: u64,
    pub dropped_out_of_order: u64,
    pub dropped_overflow: u64,
    pub forwarded: u64,
    pub arq_sent: u64,
    pub arq_served: u64,
    pub retransmitted: u64,
    pub malformed: u64,
    /// Direct and topic payloads originated here
    pub messages_sent: u64,
    /// Addressed payloads handed to the application here
    pub messages_delivered: u64,
    /// Addressed payloads for someone else, only relayed
    pub messages_passed: u64,
}


/// What happened to one received transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// In order; `released` counts buffered successors accepted with it
    Accepted { released: usize },
    Buffered,
    Duplicate,
    Dropped,
    /// ARQ request answered with this many waves
    Served(usize),
    Ignored,
}

/// One node on the broadcast medium
#[derive(Debug)]
pub struct Relay {
    id: RelayId,
    config: RelayConfig,
    participant: Participant,
    live: bool,
    next_sequence: u64,
    /// Next sequence to accept, per source
    expected: BTreeMap<RelayId, u64>,
    /// Waves ahead of `expected`, per source
    pending: BTreeMap<RelayId, BTreeMap<u64, Wave>>,
    /// Accepted waves per source, own included, indexed by sequence
    history: BTreeMap<RelayId, Vec<Wave>>,
    outbox: Vec<Transmission>,
    subscriptions: BTreeSet<TopicId>,
    inbox: Vec<AppMessage>,
    /// Relays known to have left the medium
    departed: BTreeSet<RelayId>,
    stats: RelayStats,
}

impl Relay {
    pub fn new(id: RelayId, participant: Participant, config: RelayConfig) -> Self {
        Relay {
            id,
            config,
            participant,
            live: true,
            next_sequence: 0,
            expected: BTreeMap::new(),
            pending: BTreeMap::new(),
            history: BTreeMap::new(),
            outbox: Vec::new(),
            subscriptions: BTreeSet::new(),
            inbox: Vec::new(),
            departed: BTreeSet::new(),
            stats: RelayStats::default(),
        }
    }

    pub fn id(&self) -> RelayId {
        self.id
    }

    pub fn feed_id(&self) -> FeedId {
        self.participant.feed_id()
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn participant_mut(&mut self) -> &mut Participant {
        &mut self.participant
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Next sequence this relay will accept from `source`
    pub fn expected(&self, source: RelayId) -> u64 {
        self.expected.get(&source).copied().unwrap_or(0)
    }

    /// Waves of `source` waiting for a gap to fill
    pub fn buffered(&self, source: RelayId) -> usize {
        self.pending.get(&source).map_or(0, BTreeMap::len)
    }

    /// Accepted waves of `source` in sequence order
    pub fn transport_log(&self, source: RelayId) -> &[Wave] {
        self.history.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sources this relay has heard from
    pub fn known_sources(&self) -> impl Iterator<Item = RelayId> + '_ {
        self.expected.keys().copied()
    }

    /// Number of waves this relay has originated
    pub fn originated(&self) -> u64 {
        self.next_sequence
    }

    /// Append to the own feed and push the event to everyone in reach
    pub fn publish(&mut self, content: Content, now: Tick) -> Event {
        let event = self.participant.publish(content);
        self.originate(Packet::Publish(event.clone()), now);
        event
    }

    /// Encrypted post for `recipient`, pushed like any other event
    pub fn publish_private(
        &mut self,
        recipient: FeedId,
        plaintext: &[u8],
        ctx: &mut SimulationContext,
    ) -> ScuttleResult<Event> {
        let mut rng = ctx.crypto_rng();
        let event = self.participant.publish_private(recipient, plaintext, &mut rng)?;
        self.originate(Packet::Publish(event.clone()), ctx.now());
        Ok(event)
    }

    /// Flood `payload` for relay `to` alone
    pub fn send_direct(&mut self, to: RelayId, payload: Bytes, now: Tick) -> bool {
        if !self.live || to == self.id {
            return false;
        }
        self.originate(Packet::Direct { to, payload }, now);
        self.stats.messages_sent += 1;
        true
    }

    /// Flood `payload` for every subscriber of `topic`
    pub fn send_topic(&mut self, topic: TopicId, payload: Bytes, now: Tick) -> bool {
        if !self.live {
            return false;
        }
        self.originate(Packet::Topic { topic, payload }, now);
        self.stats.messages_sent += 1;
        true
    }

    /// Start handing up messages on `topic`; false if already subscribed
    pub fn subscribe(&mut self, topic: TopicId) -> bool {
        self.subscriptions.insert(topic)
    }

    pub fn unsubscribe(&mut self, topic: TopicId) -> bool {
        self.subscriptions.remove(&topic)
    }

    pub fn is_subscribed(&self, topic: TopicId) -> bool {
        self.subscriptions.contains(&topic)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = TopicId> + '_ {
        self.subscriptions.iter().copied()
    }

    /// Take every addressed payload delivered here
    pub fn drain_messages(&mut self) -> Vec<AppMessage> {
        std::mem::take(&mut self.inbox)
    }

    /// Open a replication session with `peer`
    pub fn start_session(&mut self, peer: RelayId, now: Tick) -> bool {
        if !self.live || peer == self.id || self.departed.contains(&peer) {
            return false;
        }
        match self.participant.initiate(peer, now) {
            Some(outgoing) => {
                self.originate(outgoing.into_packet(), now);
                true
            }
            None => false,
        }
    }

    /// Go off the air. Nothing queued is sent.
    pub fn shutdown(&mut self) {
        self.live = false;
        self.outbox.clear();
        self.pending.clear();
    }

    /// A peer went away for good: its sessions cannot finish and it is
    /// never picked for gossip again. Its waves are still relayed.
    pub fn peer_lost(&mut self, peer: RelayId) -> usize {
        self.departed.insert(peer);
        self.participant.abandon(peer)
    }

    pub fn has_departed(&self, peer: RelayId) -> bool {
        self.departed.contains(&peer)
    }

    /// Transmissions waiting to go on the air
    pub fn drain_outbox(&mut self) -> Vec<Transmission> {
        std::mem::take(&mut self.outbox)
    }

    /// Handle one transmission heard on the medium
    pub fn on_receive(&mut self, transmission: Transmission, now: Tick) -> ReceiveOutcome {
        if !self.live {
            return ReceiveOutcome::Ignored;
        }
        self.stats.received += 1;
        match transmission {
            Transmission::Wave(wave) => self.on_wave(wave, now),
            Transmission::Arq(request) => self.serve(request),
        }
    }

    fn on_wave(&mut self, wave: Wave, now: Tick) -> ReceiveOutcome {
        // Our own waves echoed back by neighbors
        if wave.source == self.id {
            return ReceiveOutcome::Ignored;
        }

        let source = wave.source;
        let expected = *self.expected.entry(source).or_insert(0);

        if wave.sequence < expected {
            self.stats.duplicates += 1;
            let stale = ScuttleError::DuplicateOrStale {
                origin: source,
                sequence: wave.sequence,
                expected,
            };
            tracing::trace!(relay = %self.id, error = %stale, "wave discarded");
            return ReceiveOutcome::Duplicate;
        }

        if wave.sequence > expected {
            return self.hold(wave);
        }

        self.accept(wave, now);
        let mut released = 0;
        loop {
            let next = self.expected(source);
            let Some(wave) = self
                .pending
                .get_mut(&source)
                .and_then(|buffer| buffer.remove(&next))
            else {
                break;
            };
            self.accept(wave, now);
            released += 1;
        }
        if self.pending.get(&source).is_some_and(BTreeMap::is_empty) {
            self.pending.remove(&source);
        }
        ReceiveOutcome::Accepted { released }
    }

    /// Wave ahead of the next expected one
    fn hold(&mut self, wave: Wave) -> ReceiveOutcome {
        if !self.config.delivery.buffers() {
            self.stats.dropped_out_of_order += 1;
            return ReceiveOutcome::Dropped;
        }
        let limit = self.config.max_buffered_per_source;
        let buffer = self.pending.entry(wave.source).or_default();
        if buffer.contains_key(&wave.sequence) {
            self.stats.duplicates += 1;
            return ReceiveOutcome::Duplicate;
        }
        if buffer.len() >= limit {
            self.stats.dropped_overflow += 1;
            tracing::debug!(source = %wave.source, sequence = wave.sequence, "reorder buffer full");
            return ReceiveOutcome::Dropped;
        }
        buffer.insert(wave.sequence, wave);
        self.stats.buffered += 1;
        ReceiveOutcome::Buffered
    }

    fn accept(&mut self, wave: Wave, now: Tick) {
        *self.expected.entry(wave.source).or_insert(0) += 1;
        self.stats.accepted += 1;

        self.outbox.push(Transmission::Wave(wave.forwarded_by(self.id)));
        self.stats.forwarded += 1;
        self.history.entry(wave.source).or_default().push(wave.clone());

        self.dispatch(&wave, now);
    }

    /// Hand an accepted wave's payload to the participant
    fn dispatch(&mut self, wave: &Wave, now: Tick) {
        match Packet::decode(&wave.payload) {
            Ok(Packet::Publish(event)) => self.participant.on_publish(event),
            Ok(Packet::Session {
                to,
                initiator,
                message,
            }) if to == self.id => {
                let replies = self.participant.handle(wave.source, initiator, message, now);
                for outgoing in replies {
                    self.originate(outgoing.into_packet(), now);
                }
            }
            // Someone else's session, only relayed
            Ok(Packet::Session { .. }) => {}
            Ok(Packet::Direct { to, payload }) => {
                if to == self.id {
                    self.upcall(wave, Address::Relay(to), payload, now);
                } else {
                    self.stats.messages_passed += 1;
                }
            }
            Ok(Packet::Topic { topic, payload }) => {
                if self.subscriptions.contains(&topic) {
                    self.upcall(wave, Address::Topic(topic), payload, now);
                } else {
                    self.stats.messages_passed += 1;
                }
            }
            Err(e) => {
                self.stats.malformed += 1;
                tracing::warn!(
                    relay = %self.id,
                    source = %wave.source,
                    sequence = wave.sequence,
                    error = %e,
                    "undecodable payload"
                );
            }
        }
    }

    fn upcall(&mut self, wave: &Wave, address: Address, payload: Bytes, now: Tick) {
        self.stats.messages_delivered += 1;
        tracing::trace!(
            relay = %self.id,
            source = %wave.source,
            sequence = wave.sequence,
            ?address,
            "message delivered"
        );
        self.inbox.push(AppMessage {
            from: wave.source,
            address,
            payload,
            sent_at: wave.created_at,
            received_at: now,
        });
    }

    /// Answer an ARQ request from the transport log
    fn serve(&mut self, request: ArqRequest) -> ReceiveOutcome {
        if request.requester == self.id {
            return ReceiveOutcome::Ignored;
        }
        let Some(log) = self.history.get(&request.target) else {
            return ReceiveOutcome::Served(0);
        };
        let start = usize::try_from(request.from_sequence).unwrap_or(usize::MAX);
        let resend: Vec<Transmission> = log
            .iter()
            .skip(start)
            .take(self.config.max_retransmit_per_request)
            .map(|wave| Transmission::Wave(wave.forwarded_by(self.id)))
            .collect();

        let count = resend.len();
        if count > 0 {
            self.stats.arq_served += 1;
            self.stats.retransmitted += count as u64;
            tracing::trace!(
                relay = %self.id,
                requester = %request.requester,
                target = %request.target,
                from = request.from_sequence,
                count,
                "retransmitting"
            );
        }
        self.outbox.extend(resend);
        ReceiveOutcome::Served(count)
    }

    /// Periodic work: ARQ rounds, session housekeeping and gossip
    pub fn on_tick(&mut self, neighbors: &[RelayId], ctx: &mut SimulationContext) {
        if !self.live {
            return;
        }
        let now = ctx.now();
        self.participant.expire_sessions(now);

        if self.config.delivery.requests_retransmission() && self.is_due(now, self.config.arq_interval)
        {
            self.request_gaps(neighbors);
        }

        if self.is_due(now, self.config.gossip_interval) {
            let candidates: Vec<RelayId> = neighbors
                .iter()
                .copied()
                .chain(self.expected.keys().copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter(|peer| {
                    *peer != self.id
                        && !self.departed.contains(peer)
                        && !self.participant.in_session_with(*peer)
                })
                .collect();
            if !candidates.is_empty() {
                let peer = candidates[ctx.rng().index(candidates.len())];
                self.start_session(peer, now);
            }
        }
    }

    /// Relays run periodic work at staggered ticks
    fn is_due(&self, now: Tick, every: u64) -> bool {
        every > 0 && (now.0.wrapping_add(self.id.0)) % every == 0
    }

    fn request_gaps(&mut self, neighbors: &[RelayId]) {
        let sources: BTreeSet<RelayId> = self
            .expected
            .keys()
            .chain(neighbors.iter())
            .copied()
            .filter(|source| *source != self.id)
            .collect();
        for target in sources {
            let from_sequence = self.expected(target);
            self.outbox.push(Transmission::Arq(ArqRequest {
                requester: self.id,
                target,
                from_sequence,
            }));
            self.stats.arq_sent += 1;
        }
    }

    fn originate(&mut self, packet: Packet, now: Tick) {
        let wave = Wave::new(self.id, self.next_sequence, packet.encode(), now);
        self.next_sequence += 1;
        self.stats.originated += 1;
        self.history.entry(self.id).or_default().push(wave.clone());
        self.outbox.push(Transmission::Wave(wave));
    }
}
