//! Run metrics

use std::fmt;

use scuttle_core::Tick;

use crate::Simulation;

/// Network-wide counters at one tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub tick: Tick,
    pub relays: usize,
    pub live_relays: usize,

    // Medium
    pub transmissions: u64,
    pub frames_scheduled: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub collisions: u64,
    pub avg_latency: f64,

    // Relays
    pub waves_originated: u64,
    pub waves_accepted: u64,
    pub duplicates: u64,
    pub arq_sent: u64,
    pub retransmitted: u64,
    pub missing_refs: u64,
    pub messages_sent: u64,
    pub messages_delivered: u64,

    // Replication
    pub sessions_completed: u64,
    pub sessions_abandoned: u64,
    pub events_replicated: u64,
    pub events_delivered: u64,
    pub log_events: usize,
    /// Largest pairwise frontier divergence between live relays
    pub max_divergence: u64,
}

impl MetricsSnapshot {
    pub fn capture(sim: &Simulation) -> Self {
        let medium = sim.medium().stats();
        let mut snapshot = MetricsSnapshot {
            tick: sim.now(),
            relays: sim.relay_count(),
            live_relays: sim.live_relays().count(),
            transmissions: medium.transmissions,
            frames_scheduled: medium.deliveries_scheduled,
            frames_delivered: medium.delivered,
            frames_lost: medium.lost(),
            collisions: medium.lost_collision,
            avg_latency: medium.avg_latency(),
            missing_refs: sim.total_missing_refs(),
            ..Default::default()
        };

        for relay in sim.relays() {
            let stats = relay.stats();
            snapshot.waves_originated += stats.originated;
            snapshot.waves_accepted += stats.accepted;
            snapshot.duplicates += stats.duplicates;
            snapshot.arq_sent += stats.arq_sent;
            snapshot.retransmitted += stats.retransmitted;
            snapshot.messages_sent += stats.messages_sent;
            snapshot.messages_delivered += stats.messages_delivered;

            let gossip = relay.participant().stats();
            snapshot.sessions_completed += gossip.sessions_completed;
            snapshot.sessions_abandoned += gossip.sessions_abandoned;
            snapshot.events_replicated += gossip.events_replicated;
            snapshot.events_delivered += gossip.events_delivered;
            snapshot.log_events += relay.participant().store().total_events();
        }

        let frontiers: Vec<_> = sim
            .live_relays()
            .map(|relay| relay.participant().store().full_frontier())
            .collect();
        snapshot.max_divergence = frontiers
            .iter()
            .enumerate()
            .flat_map(|(i, a)| frontiers[i + 1..].iter().map(move |b| a.divergence(b)))
            .max()
            .unwrap_or(0);

        snapshot
    }

    /// Fraction of scheduled frames that arrived
    pub fn delivery_ratio(&self) -> f64 {
        if self.frames_scheduled == 0 {
            1.0
        } else {
            self.frames_delivered as f64 / self.frames_scheduled as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} relays={}/{} frames={}/{} lost={} collisions={} arq={} resent={} missing={} \
             sessions={} replicated={} messages={}/{} divergence={}",
            self.tick,
            self.live_relays,
            self.relays,
            self.frames_delivered,
            self.frames_scheduled,
            self.frames_lost,
            self.collisions,
            self.arq_sent,
            self.retransmitted,
            self.missing_refs,
            self.sessions_completed,
            self.events_replicated,
            self.messages_delivered,
            self.messages_sent,
            self.max_divergence,
        )
    }
}

#[cfg(test)]
mod tests {
    use scuttle_broadcast::Position;
    use scuttle_core::{MediumConfig, SimConfig};

    use super::*;

    #[test]
    fn test_empty_world() {
        let sim = Simulation::new(SimConfig::default()).unwrap();
        let snapshot = MetricsSnapshot::capture(&sim);
        assert_eq!(snapshot.relays, 0);
        assert_eq!(snapshot.max_divergence, 0);
        assert_eq!(snapshot.delivery_ratio(), 1.0);
    }

    #[test]
    fn test_counts_traffic() {
        let config = SimConfig {
            medium: MediumConfig::ideal(),
            ..Default::default()
        };
        let mut sim = Simulation::new(config).unwrap();
        let a = sim.add_relay(Position::new(0.0, 0.0));
        sim.add_relay(Position::new(30.0, 0.0));
        sim.post(a, "one").unwrap();
        sim.run(3);

        let snapshot = MetricsSnapshot::capture(&sim);
        assert_eq!(snapshot.live_relays, 2);
        assert!(snapshot.transmissions >= 1);
        assert!(snapshot.waves_accepted >= 1);
        assert_eq!(snapshot.delivery_ratio(), 1.0);
        assert!(snapshot.to_string().starts_with("t3"));
    }
}
