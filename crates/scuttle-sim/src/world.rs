//! Simulation world
//!
//! Owns the clock, the medium, the placement and every relay. One `step`
//! is one tick:
//! 1. the clock advances and neighbor tables refresh when due
//! 2. frames due by now are handed to their receivers
//! 3. every relay runs its periodic work
//! 4. everything the relays queued goes on the air

use std::collections::BTreeMap;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;

use scuttle_broadcast::{Medium, MediumObserver, Placement, Position, Relay};
use scuttle_core::{
    Content, Event, FeedId, Frontier, MediumConfig, RelayId, ScuttleResult, SimConfig,
    SimulationContext, Tick, TopicId,
};
use scuttle_crypto::Identity;
use scuttle_gossip::Participant;

// ============================================================================
// SIMULATION
// ============================================================================

/// A complete simulated network
pub struct Simulation {
    config: SimConfig,
    ctx: SimulationContext,
    medium: Medium,
    placement: Placement,
    relays: BTreeMap<RelayId, Relay>,
    next_id: u64,
}

impl Simulation {
    /// Create an empty world, rejecting an invalid configuration
    pub fn new(config: SimConfig) -> ScuttleResult<Self> {
        config.validate()?;
        Ok(Simulation {
            ctx: SimulationContext::new(config.seed),
            medium: Medium::new(config.medium.clone()),
            placement: Placement::new(),
            relays: BTreeMap::new(),
            next_id: 0,
            config,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> Tick {
        self.ctx.now()
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Place a new relay with a fresh identity derived from the run's seed
    pub fn add_relay(&mut self, position: Position) -> RelayId {
        let id = RelayId::new(self.next_id);
        self.next_id += 1;

        let mut key_rng = StdRng::seed_from_u64(
            self.config.seed ^ id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        let identity = Identity::generate_with(&mut key_rng);
        let participant = Participant::new(identity, &self.config.gossip);
        let mut relay = Relay::new(id, participant, self.config.relay.clone());
        for dead in self.relays.values().filter(|r| !r.is_live()) {
            relay.peer_lost(dead.id());
        }
        tracing::debug!(relay = %id, feed = ?relay.feed_id(), "relay added");

        self.relays.insert(id, relay);
        self.placement.place(id, position);
        self.medium.join(id);
        self.medium.refresh_neighbors(&self.placement);
        id
    }

    /// Move a relay; the medium notices at its next neighbor refresh
    pub fn move_relay(&mut self, id: RelayId, position: Position) -> bool {
        if !self.relays.contains_key(&id) {
            return false;
        }
        self.placement.place(id, position);
        true
    }

    /// Take a relay off the air for good
    pub fn kill_relay(&mut self, id: RelayId) -> bool {
        let Some(relay) = self.relays.get_mut(&id) else {
            return false;
        };
        if !relay.is_live() {
            return false;
        }
        relay.shutdown();
        self.medium.leave(id);
        self.placement.remove(id);
        for other in self.relays.values_mut().filter(|r| r.id() != id) {
            other.peer_lost(id);
        }
        tracing::debug!(relay = %id, at = %self.ctx.now(), "relay killed");
        true
    }

    pub fn relay(&self, id: RelayId) -> Option<&Relay> {
        self.relays.get(&id)
    }

    pub fn relay_mut(&mut self, id: RelayId) -> Option<&mut Relay> {
        self.relays.get_mut(&id)
    }

    pub fn relays(&self) -> impl Iterator<Item = &Relay> {
        self.relays.values()
    }

    pub fn live_relays(&self) -> impl Iterator<Item = &Relay> {
        self.relays.values().filter(|relay| relay.is_live())
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Feed of a relay's participant
    pub fn feed_of(&self, id: RelayId) -> Option<FeedId> {
        self.relays.get(&id).map(Relay::feed_id)
    }

    pub fn subscribe(&mut self, observer: Box<dyn MediumObserver>) {
        self.medium.subscribe(observer);
    }

    /// Change channel conditions mid-run
    pub fn set_medium(&mut self, config: MediumConfig) -> ScuttleResult<()> {
        config.validate()?;
        self.config.medium = config.clone();
        self.medium.set_config(config);
        Ok(())
    }

    // ========================================================================
    // APPLICATION ACTIONS
    // ========================================================================

    /// Publish on a relay's feed and push it to the neighborhood
    pub fn publish(&mut self, id: RelayId, content: Content) -> Option<Event> {
        let now = self.ctx.now();
        let relay = self.relays.get_mut(&id).filter(|relay| relay.is_live())?;
        Some(relay.publish(content, now))
    }

    pub fn post(&mut self, id: RelayId, text: &str) -> Option<Event> {
        self.publish(id, Content::Post(text.as_bytes().to_vec()))
    }

    /// `who` follows the feed of `whom`
    pub fn follow(&mut self, who: RelayId, whom: RelayId) -> Option<Event> {
        let feed = self.feed_of(whom)?;
        self.publish(who, Content::Follow(feed))
    }

    pub fn unfollow(&mut self, who: RelayId, whom: RelayId) -> Option<Event> {
        let feed = self.feed_of(whom)?;
        self.publish(who, Content::Unfollow(feed))
    }

    pub fn block(&mut self, who: RelayId, whom: RelayId) -> Option<Event> {
        let feed = self.feed_of(whom)?;
        self.publish(who, Content::Block(feed))
    }

    pub fn unblock(&mut self, who: RelayId, whom: RelayId) -> Option<Event> {
        let feed = self.feed_of(whom)?;
        self.publish(who, Content::Unblock(feed))
    }

    /// Sealed post on `from`'s feed that only `to` can read
    ///
    /// `None` when either relay is unknown or `from` is off the air.
    pub fn publish_private(
        &mut self,
        from: RelayId,
        to: RelayId,
        text: &str,
    ) -> Option<ScuttleResult<Event>> {
        let recipient = self.feed_of(to)?;
        let relay = self.relays.get_mut(&from).filter(|relay| relay.is_live())?;
        Some(relay.publish_private(recipient, text.as_bytes(), &mut self.ctx))
    }

    /// Flood a message that only `to` hands to its application
    pub fn send_direct(&mut self, from: RelayId, to: RelayId, payload: &[u8]) -> bool {
        let now = self.ctx.now();
        self.relays
            .get_mut(&from)
            .is_some_and(|relay| relay.send_direct(to, Bytes::copy_from_slice(payload), now))
    }

    /// Flood a message for every subscriber of `topic`
    pub fn send_topic(&mut self, from: RelayId, topic: TopicId, payload: &[u8]) -> bool {
        let now = self.ctx.now();
        self.relays
            .get_mut(&from)
            .is_some_and(|relay| relay.send_topic(topic, Bytes::copy_from_slice(payload), now))
    }

    pub fn subscribe_topic(&mut self, id: RelayId, topic: TopicId) -> bool {
        self.relays
            .get_mut(&id)
            .is_some_and(|relay| relay.subscribe(topic))
    }

    pub fn unsubscribe_topic(&mut self, id: RelayId, topic: TopicId) -> bool {
        self.relays
            .get_mut(&id)
            .is_some_and(|relay| relay.unsubscribe(topic))
    }

    /// Open a replication session outside the gossip schedule
    pub fn start_session(&mut self, from: RelayId, to: RelayId) -> bool {
        let now = self.ctx.now();
        self.relays
            .get_mut(&from)
            .is_some_and(|relay| relay.start_session(to, now))
    }

    // ========================================================================
    // SCHEDULER
    // ========================================================================

    /// Advance one tick
    pub fn step(&mut self) -> Tick {
        let now = self.ctx.advance();

        if self.ctx.is_due(self.config.relay.neighbor_refresh_interval) {
            self.medium.refresh_neighbors(&self.placement);
        }

        for (to, transmission) in self.medium.deliver_due(now) {
            if let Some(relay) = self.relays.get_mut(&to) {
                relay.on_receive(transmission, now);
            }
        }

        for relay in self.relays.values_mut() {
            let neighbors = self.medium.neighbors(relay.id());
            relay.on_tick(&neighbors, &mut self.ctx);
        }

        self.flush();
        now
    }

    /// Put every queued transmission on the air
    pub fn flush(&mut self) {
        for relay in self.relays.values_mut() {
            let from = relay.id();
            for transmission in relay.drain_outbox() {
                self.medium.propagate(from, transmission, &mut self.ctx);
            }
        }
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Step until `done` holds, at most `max_ticks` times. Returns the tick
    /// at which it held.
    pub fn run_until<F>(&mut self, mut done: F, max_ticks: u64) -> Option<Tick>
    where
        F: FnMut(&Simulation) -> bool,
    {
        for _ in 0..max_ticks {
            if done(self) {
                return Some(self.now());
            }
            self.step();
        }
        done(self).then(|| self.now())
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Frontier over everything a relay replicates
    pub fn frontier(&self, id: RelayId) -> Option<Frontier> {
        self.relays
            .get(&id)
            .map(|relay| relay.participant().store().full_frontier())
    }

    /// Every pair of live relays agrees on the feeds both replicate
    pub fn converged(&self) -> bool {
        let frontiers: Vec<Frontier> = self
            .live_relays()
            .map(|relay| relay.participant().store().full_frontier())
            .collect();
        frontiers.iter().enumerate().all(|(i, a)| {
            frontiers[i + 1..].iter().all(|b| a.agrees_with(b))
        })
    }

    /// Every live relay holds every live relay's full feed
    pub fn fully_replicated(&self) -> bool {
        self.live_relays().all(|replica| {
            let store = replica.participant().store();
            self.live_relays().all(|author| {
                let own = author.participant().store().own_log();
                store
                    .log(&own.feed())
                    .is_some_and(|log| log.last_index() == own.last_index())
            })
        })
    }

    /// Waves `source` originated that `receiver` has not accepted yet
    pub fn missing_refs(&self, receiver: RelayId, source: RelayId) -> Option<u64> {
        let sent = self.relays.get(&source)?.originated();
        let accepted = self.relays.get(&receiver)?.expected(source);
        Some(sent.saturating_sub(accepted))
    }

    /// Missing waves summed over every live ordered pair
    pub fn total_missing_refs(&self) -> u64 {
        let live: Vec<RelayId> = self.live_relays().map(Relay::id).collect();
        live.iter()
            .flat_map(|receiver| live.iter().map(move |source| (*receiver, *source)))
            .filter(|(receiver, source)| receiver != source)
            .filter_map(|(receiver, source)| self.missing_refs(receiver, source))
            .sum()
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now", &self.ctx.now())
            .field("relays", &self.relays.len())
            .field("medium", &self.medium)
            .finish()
    }
}
