//! Broadcast medium
//!
//! Every transmission reaches each neighbor of the sender after the
//! propagation delay, plus jitter and the frame's own transmission time.
//! Loss is decided when the frame goes on the air; the outcome is only
//! observable once its arrival time is reached.
//!
//! Time is fractional inside the medium: a frame arriving at 3.4 is handed
//! over by `deliver_due` at tick 4.

use std::collections::{BTreeMap, BTreeSet};

use scuttle_core::{MediumConfig, RelayId, ScuttleError, SimulationContext, Tick};

use crate::{Link, NeighborTable, Topology, Transmission};

/// Why a frame never reached its receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossCause {
    /// Loss model said no
    Attenuation,
    /// Overlapped another frame at the receiver
    Collision,
    /// Receiver was not on the air at arrival
    Offline,
}

impl LossCause {
    pub fn as_error(self) -> ScuttleError {
        match self {
            LossCause::Attenuation | LossCause::Offline => ScuttleError::MessageLost,
            LossCause::Collision => ScuttleError::Collision,
        }
    }
}

/// What observers see happening on the air
#[derive(Debug, Clone, PartialEq)]
pub enum MediumEvent {
    Sent {
        from: RelayId,
        to: RelayId,
        at: Tick,
        arrival: f64,
    },
    Delivered {
        from: RelayId,
        to: RelayId,
        at: Tick,
    },
    Lost {
        from: RelayId,
        to: RelayId,
        at: Tick,
        cause: LossCause,
    },
    /// Held back by the link's bandwidth, retried next tick
    Deferred {
        from: RelayId,
        to: RelayId,
        at: Tick,
    },
}

/// Subscriber to the medium's event stream
pub trait MediumObserver {
    fn on_event(&mut self, event: &MediumEvent);
}

/// Medium statistics
#[derive(Clone, Debug, Default)]
pub struct MediumStats {
    pub transmissions: u64,
    pub deliveries_scheduled: u64,
    pub delivered: u64,
    pub lost_attenuation: u64,
    pub lost_collision: u64,
    pub dropped_offline: u64,
    pub deferred: u64,
    pub bytes_on_air: u64,
    /// Sum of arrival minus send time over delivered frames
    pub total_latency: f64,
    pub max_latency: f64,
}

impl MediumStats {
    pub fn lost(&self) -> u64 {
        self.lost_attenuation + self.lost_collision + self.dropped_offline
    }

    pub fn loss_rate(&self) -> f64 {
        if self.deliveries_scheduled == 0 {
            0.0
        } else {
            self.lost() as f64 / self.deliveries_scheduled as f64
        }
    }

    pub fn avg_latency(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_latency / self.delivered as f64
        }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    from: RelayId,
    to: RelayId,
    sent_at: Tick,
    arrival: f64,
    transmission: Transmission,
    lost: Option<LossCause>,
}

/// The shared lossy channel
pub struct Medium {
    config: MediumConfig,
    neighbors: NeighborTable,
    live: BTreeSet<RelayId>,
    in_flight: Vec<InFlight>,
    observers: Vec<Box<dyn MediumObserver>>,
    stats: MediumStats,
}

impl Medium {
    pub fn new(config: MediumConfig) -> Self {
        Medium {
            config,
            neighbors: NeighborTable::new(),
            live: BTreeSet::new(),
            in_flight: Vec::new(),
            observers: Vec::new(),
            stats: MediumStats::default(),
        }
    }

    pub fn config(&self) -> &MediumConfig {
        &self.config
    }

    /// Change channel conditions; frames already on the air keep their fate
    pub fn set_config(&mut self, config: MediumConfig) {
        self.config = config;
    }

    /// Put a relay on the air; it gets links at the next refresh
    pub fn join(&mut self, relay: RelayId) {
        self.live.insert(relay);
    }

    /// Take a relay off the air. Frames it already sent still arrive.
    pub fn leave(&mut self, relay: RelayId) {
        self.live.remove(&relay);
        self.neighbors.forget(relay);
    }

    pub fn is_live(&self, relay: RelayId) -> bool {
        self.live.contains(&relay)
    }

    pub fn subscribe(&mut self, observer: Box<dyn MediumObserver>) {
        self.observers.push(observer);
    }

    /// Rebuild the neighbor table of every live relay
    pub fn refresh_neighbors(&mut self, topology: &dyn Topology) {
        let live: Vec<RelayId> = self.live.iter().copied().collect();
        self.neighbors.refresh(
            topology,
            live.iter().copied(),
            self.config.broadcast_range,
            self.config.propagation_speed,
        );
        // Placed but offline relays never show up as neighbors
        let offline: Vec<RelayId> = live
            .iter()
            .flat_map(|relay| self.neighbors.neighbors(*relay))
            .filter(|relay| !self.live.contains(relay))
            .collect();
        for relay in offline {
            self.neighbors.forget(relay);
        }
        tracing::trace!(links = self.neighbors.link_count(), "neighbor tables refreshed");
    }

    pub fn neighbors(&self, relay: RelayId) -> Vec<RelayId> {
        self.neighbors.neighbors(relay)
    }

    pub fn link(&self, from: RelayId, to: RelayId) -> Option<Link> {
        self.neighbors.link(from, to)
    }

    /// Frames on the air, lost ones included until their arrival
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    /// Broadcast `transmission` from `from` to all of its neighbors.
    /// Returns the number of receivers scheduled.
    pub fn propagate(
        &mut self,
        from: RelayId,
        transmission: Transmission,
        ctx: &mut SimulationContext,
    ) -> usize {
        if !self.is_live(from) {
            return 0;
        }
        self.stats.transmissions += 1;

        let now = ctx.now();
        let links: Vec<Link> = self.neighbors.links(from).to_vec();
        for link in &links {
            let jitter = self.config.jitter.sample(ctx.rng());
            let arrival =
                now.as_f64() + link.latency + jitter + self.config.transmission_time;
            let lost = self
                .config
                .loss
                .is_lost(link.distance, ctx.rng())
                .then_some(LossCause::Attenuation);

            let mut frame = InFlight {
                from,
                to: link.to,
                sent_at: now,
                arrival,
                transmission: transmission.clone(),
                lost,
            };
            if self.config.collisions {
                self.collide(&mut frame);
            }

            self.stats.deliveries_scheduled += 1;
            self.stats.bytes_on_air += transmission.payload_len() as u64;
            self.emit(MediumEvent::Sent {
                from,
                to: link.to,
                at: now,
                arrival,
            });
            self.in_flight.push(frame);
        }
        links.len()
    }

    /// Mark `frame` and every frame overlapping it at the same receiver
    fn collide(&mut self, frame: &mut InFlight) {
        let window = self.config.transmission_time;
        let mut hit = false;
        for other in self
            .in_flight
            .iter_mut()
            .filter(|other| other.to == frame.to && other.from != frame.from)
        {
            if (other.arrival - frame.arrival).abs() < window {
                hit = true;
                if other.lost.is_none() {
                    other.lost = Some(LossCause::Collision);
                }
            }
        }
        if hit && frame.lost.is_none() {
            frame.lost = Some(LossCause::Collision);
        }
    }

    /// Hand over every frame due by `now`, earliest arrival first
    pub fn deliver_due(&mut self, now: Tick) -> Vec<(RelayId, Transmission)> {
        let horizon = now.as_f64();
        let (mut due, pending): (Vec<InFlight>, Vec<InFlight>) =
            std::mem::take(&mut self.in_flight)
                .into_iter()
                .partition(|frame| frame.arrival <= horizon);
        self.in_flight = pending;
        due.sort_by(|a, b| a.arrival.total_cmp(&b.arrival));

        let mut usage: BTreeMap<(RelayId, RelayId), usize> = BTreeMap::new();
        let mut delivered = Vec::new();
        for frame in due {
            let (from, to) = (frame.from, frame.to);
            if let Some(cause) = frame.lost {
                self.record_loss(from, to, now, cause);
                continue;
            }
            if !self.is_live(to) {
                self.record_loss(from, to, now, LossCause::Offline);
                continue;
            }

            let used = usage.entry((from, to)).or_insert(0);
            if self.config.link_bandwidth > 0 && *used >= self.config.link_bandwidth {
                self.stats.deferred += 1;
                self.emit(MediumEvent::Deferred { from, to, at: now });
                self.in_flight.push(frame);
                continue;
            }
            *used += 1;

            let latency = frame.arrival - frame.sent_at.as_f64();
            self.stats.delivered += 1;
            self.stats.total_latency += latency;
            self.stats.max_latency = self.stats.max_latency.max(latency);
            self.emit(MediumEvent::Delivered { from, to, at: now });
            delivered.push((to, frame.transmission));
        }
        delivered
    }

    fn record_loss(&mut self, from: RelayId, to: RelayId, at: Tick, cause: LossCause) {
        match cause {
            LossCause::Attenuation => self.stats.lost_attenuation += 1,
            LossCause::Collision => self.stats.lost_collision += 1,
            LossCause::Offline => self.stats.dropped_offline += 1,
        }
        tracing::trace!(from = %from, to = %to, error = %cause.as_error(), "frame lost");
        self.emit(MediumEvent::Lost { from, to, at, cause });
    }

    fn emit(&mut self, event: MediumEvent) {
        for observer in &mut self.observers {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Medium")
            .field("live", &self.live.len())
            .field("links", &self.neighbors.link_count())
            .field("in_flight", &self.in_flight.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}
