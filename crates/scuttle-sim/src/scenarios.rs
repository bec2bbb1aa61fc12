//! Canned scenarios
//!
//! Each runs a complete simulation and reports what a test needs to judge
//! it. They double as usage examples of the harness.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use scuttle_broadcast::Address;
use scuttle_core::{
    Content, GossipConfig, InterestMode, LossModel, MediumConfig, RelayConfig, RelayId,
    ScuttleResult, Tick, TopicId,
};
use scuttle_crypto::verify_event;

use crate::{Layout, MetricsSnapshot, ScenarioBuilder, Simulation};

/// Outcome of a convergence run
#[derive(Clone, Debug)]
pub struct ConvergenceReport {
    /// Tick at which every relay held every feed, if it happened
    pub converged_at: Option<Tick>,
    pub metrics: MetricsSnapshot,
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.converged_at.is_some()
    }
}

/// Every relay posts `posts` times, then the network runs until every feed
/// is everywhere
pub fn convergence(
    relays: usize,
    layout: Layout,
    medium: MediumConfig,
    posts: usize,
    seed: u64,
    max_ticks: u64,
) -> ScuttleResult<ConvergenceReport> {
    let (mut sim, ids) = ScenarioBuilder::new()
        .with_relays(relays)
        .with_layout(layout)
        .with_medium(medium)
        .with_seed(seed)
        .build()?;

    for round in 0..posts {
        for id in &ids {
            sim.post(*id, &format!("post {round} from {id}"));
        }
        sim.step();
    }

    let converged_at = sim.run_until(|s| s.fully_replicated() && s.converged(), max_ticks);
    let metrics = MetricsSnapshot::capture(&sim);
    tracing::info!(%metrics, "convergence run finished");
    Ok(ConvergenceReport {
        converged_at,
        metrics,
    })
}

/// Outcome of the single-session exchange
#[derive(Clone, Debug)]
pub struct HelloReport {
    /// Events of the author's feed held by the peer
    pub replicated: Vec<(u64, Content)>,
    pub signatures_valid: bool,
    pub deliveries: usize,
    pub sessions_completed: u64,
}

/// A appends "hello" without pushing it, then one session with B
pub fn hello(seed: u64) -> ScuttleResult<HelloReport> {
    let relay = RelayConfig {
        // Only the session we start ourselves
        gossip_interval: u64::MAX,
        ..Default::default()
    };
    let (mut sim, ids) = ScenarioBuilder::new()
        .with_relays(2)
        .with_medium(MediumConfig::ideal())
        .with_relay_config(relay)
        .with_seed(seed)
        .build()?;
    let (a, b) = (ids[0], ids[1]);

    if let Some(relay) = sim.relay_mut(a) {
        relay
            .participant_mut()
            .publish(Content::Post(b"hello".to_vec()));
    }
    sim.start_session(a, b);
    sim.run_until(
        |s| {
            s.relays()
                .map(|relay| relay.participant().stats().sessions_completed)
                .sum::<u64>()
                >= 2
        },
        100,
    );

    let mut report = HelloReport {
        replicated: Vec::new(),
        signatures_valid: false,
        deliveries: 0,
        sessions_completed: 0,
    };
    let Some(feed) = sim.feed_of(a) else {
        return Ok(report);
    };
    let Some(peer) = sim.relay_mut(b) else {
        return Ok(report);
    };
    report.deliveries = peer.participant_mut().drain_deliveries().len();
    report.sessions_completed = peer.participant().stats().sessions_completed;
    if let Some(log) = peer.participant().store().log(&feed) {
        report.signatures_valid = log
            .events()
            .iter()
            .all(|event| verify_event(&feed, event).is_ok());
        report.replicated = log
            .events()
            .iter()
            .map(|event| (event.index, event.content.clone()))
            .collect();
    }
    Ok(report)
}

/// Outcome of the lossy-link recovery run
#[derive(Clone, Debug)]
pub struct LossRecoveryReport {
    pub originated: u64,
    /// Waves of A that C lacked when the loss stopped
    pub missing_after_loss: u64,
    /// Tick at which C had every wave of A
    pub recovered_at: Option<Tick>,
    pub metrics: MetricsSnapshot,
}

/// A posts every tick over a link losing `loss` of all frames for
/// `lossy_ticks`, then ARQ runs on a clean channel
pub fn loss_recovery(
    loss: f64,
    lossy_ticks: u64,
    seed: u64,
    max_ticks: u64,
) -> ScuttleResult<LossRecoveryReport> {
    let lossy = MediumConfig {
        loss: LossModel::Uniform { probability: loss },
        ..MediumConfig::ideal()
    };
    let (mut sim, ids) = ScenarioBuilder::new()
        .with_relays(2)
        .with_medium(lossy)
        .with_seed(seed)
        .build()?;
    let (a, c) = (ids[0], ids[1]);

    for tick in 0..lossy_ticks {
        sim.post(a, &format!("tick {tick}"));
        sim.step();
    }
    let missing_after_loss = sim.missing_refs(c, a).unwrap_or(0);

    sim.set_medium(MediumConfig::ideal())?;
    let recovered_at = sim.run_until(|s| s.missing_refs(c, a) == Some(0), max_ticks);
    Ok(LossRecoveryReport {
        originated: sim.relay(a).map_or(0, |relay| relay.originated()),
        missing_after_loss,
        recovered_at,
        metrics: MetricsSnapshot::capture(&sim),
    })
}

/// Outcome of the follow-then-block run
#[derive(Clone, Debug, Default)]
pub struct TransitiveReport {
    /// A replicated C through B before the block
    pub reached_second_hop: bool,
    pub c_transitively_followed: bool,
    pub c_kept_after_block: bool,
    pub b_kept_after_block: bool,
}

/// A follows B, B follows C, A and C are out of range of each other.
/// Then A blocks B. With `a_follows_c` A also follows C directly.
pub fn transitive_follow_block(a_follows_c: bool, seed: u64) -> ScuttleResult<TransitiveReport> {
    let gossip = GossipConfig {
        interest: InterestMode::Transitive,
        ..Default::default()
    };
    let (mut sim, ids) = ScenarioBuilder::new()
        .with_relays(3)
        .with_layout(Layout::Line { spacing: 60.0 })
        .with_medium(MediumConfig::ideal())
        .with_gossip(gossip)
        .with_seed(seed)
        .build()?;
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    let (Some(b_feed), Some(c_feed)) = (sim.feed_of(b), sim.feed_of(c)) else {
        return Ok(TransitiveReport::default());
    };

    sim.follow(a, b);
    sim.follow(b, c);
    if a_follows_c {
        sim.follow(a, c);
    }
    sim.post(c, "far away");

    let reached = sim.run_until(
        |s| {
            s.relay(a)
                .and_then(|relay| relay.participant().store().log(&c_feed))
                .is_some_and(|log| log.last_index() >= 1)
        },
        300,
    );

    let mut report = TransitiveReport {
        reached_second_hop: reached.is_some(),
        ..Default::default()
    };
    report.c_transitively_followed = sim
        .relay(a)
        .and_then(|relay| relay.participant().interest().transitive())
        .is_some_and(|interest| interest.transitively_followed().contains(&c_feed));

    sim.block(a, b);
    sim.post(c, "after the block");
    sim.run(100);

    if let Some(store) = sim.relay(a).map(|relay| relay.participant().store()) {
        report.c_kept_after_block = store.contains(&c_feed);
        report.b_kept_after_block = store.contains(&b_feed);
    }
    Ok(report)
}

/// Outcome of the topic multicast run
#[derive(Clone, Debug)]
pub struct MulticastReport {
    pub sent: u64,
    /// Subscriber deliveries the sent messages call for
    pub expected: u64,
    pub delivered: u64,
    /// Deliveries at relays not subscribed to the topic
    pub misdelivered: u64,
    pub completed_at: Option<Tick>,
    pub metrics: MetricsSnapshot,
}

/// Each relay subscribes to every one of `topics` with probability 0.4,
/// then for `rounds` rounds sends on one of its own topics
pub fn topic_multicast(
    relays: usize,
    topics: u32,
    rounds: usize,
    medium: MediumConfig,
    seed: u64,
    max_ticks: u64,
) -> ScuttleResult<MulticastReport> {
    let (mut sim, ids) = ScenarioBuilder::new()
        .with_relays(relays)
        .with_layout(Layout::Line { spacing: 45.0 })
        .with_medium(medium)
        .with_seed(seed)
        .build()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut subscribed: Vec<(RelayId, Vec<TopicId>)> = Vec::with_capacity(ids.len());
    for id in &ids {
        let mine: Vec<TopicId> = (0..topics)
            .map(TopicId::new)
            .filter(|_| rng.gen_bool(0.4))
            .collect();
        for topic in &mine {
            sim.subscribe_topic(*id, *topic);
        }
        subscribed.push((*id, mine));
    }

    let mut sent = 0;
    let mut expected = 0;
    for round in 0..rounds {
        for (id, mine) in &subscribed {
            if mine.is_empty() {
                continue;
            }
            let topic = mine[rng.gen_range(0..mine.len())];
            if sim.send_topic(*id, topic, format!("{round} from {id}").as_bytes()) {
                sent += 1;
                expected += subscribed
                    .iter()
                    .filter(|(other, theirs)| other != id && theirs.contains(&topic))
                    .count() as u64;
            }
        }
        sim.step();
    }

    let delivered = |s: &Simulation| -> u64 {
        s.relays().map(|relay| relay.stats().messages_delivered).sum()
    };
    let completed_at = sim.run_until(|s| delivered(s) >= expected, max_ticks);

    let mut misdelivered = 0;
    for (id, mine) in &subscribed {
        let topics: BTreeSet<TopicId> = mine.iter().copied().collect();
        if let Some(relay) = sim.relay_mut(*id) {
            misdelivered += relay
                .drain_messages()
                .iter()
                .filter(|message| match message.address {
                    Address::Topic(topic) => !topics.contains(&topic),
                    Address::Relay(to) => to != *id,
                })
                .count() as u64;
        }
    }

    Ok(MulticastReport {
        sent,
        expected,
        delivered: delivered(&sim),
        misdelivered,
        completed_at,
        metrics: MetricsSnapshot::capture(&sim),
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use scuttle_broadcast::Position;
    use scuttle_core::{FeedId, Frontier, SimConfig};

    use super::*;
    use crate::{init_tracing, Simulation};

    #[test]
    fn test_hello_single_session() {
        init_tracing();
        let report = hello(1).unwrap();
        assert_eq!(report.replicated, vec![(1, Content::Post(b"hello".to_vec()))]);
        assert!(report.signatures_valid);
        assert_eq!(report.deliveries, 1);
        assert_eq!(report.sessions_completed, 1);
    }

    #[test]
    fn test_convergence_ideal() {
        let report =
            convergence(4, Layout::Line { spacing: 50.0 }, MediumConfig::ideal(), 3, 2, 200)
                .unwrap();
        assert!(report.converged(), "{}", report.metrics);
        assert_eq!(report.metrics.max_divergence, 0);
    }

    #[test]
    fn test_convergence_poor_channel() {
        init_tracing();
        let report =
            convergence(5, Layout::Line { spacing: 45.0 }, MediumConfig::poor(), 2, 3, 3000)
                .unwrap();
        assert!(report.converged(), "{}", report.metrics);
        assert!(report.metrics.frames_lost > 0);
    }

    #[test]
    fn test_loss_recovery_with_arq() {
        init_tracing();
        let report = loss_recovery(0.3, 50, 4, 500).unwrap();
        assert!(report.originated >= 50);
        assert!(report.recovered_at.is_some(), "{}", report.metrics);
        assert!(report.metrics.frames_lost > 0);
    }

    #[test]
    fn test_transitive_follow_then_block() {
        let report = transitive_follow_block(false, 5).unwrap();
        assert!(report.reached_second_hop);
        assert!(report.c_transitively_followed);
        assert!(!report.c_kept_after_block);
        assert!(!report.b_kept_after_block);
    }

    #[test]
    fn test_direct_follow_survives_block() {
        let report = transitive_follow_block(true, 6).unwrap();
        assert!(report.reached_second_hop);
        assert!(report.c_kept_after_block);
        assert!(!report.b_kept_after_block);
    }

    #[test]
    fn test_killed_relay_partitions_then_heals() {
        let config = SimConfig {
            medium: MediumConfig::ideal(),
            seed: 8,
            ..Default::default()
        };
        let mut sim = Simulation::new(config).unwrap();
        let a = sim.add_relay(Position::new(0.0, 0.0));
        let b = sim.add_relay(Position::new(60.0, 0.0));
        let c = sim.add_relay(Position::new(120.0, 0.0));
        assert!(sim.run_until(|s| s.fully_replicated(), 300).is_some());

        sim.start_session(a, b);
        sim.kill_relay(b);
        assert!(!sim.relay(a).unwrap().participant().in_session_with(b));

        sim.post(a, "while apart");
        sim.run(40);
        assert!(!sim.fully_replicated());

        sim.move_relay(c, Position::new(50.0, 0.0));
        let healed = sim.run_until(|s| s.fully_replicated(), 300);
        assert!(healed.is_some());
    }

    #[test]
    fn test_frontier_monotonic_under_loss() {
        let (mut sim, ids) = ScenarioBuilder::new()
            .with_relays(3)
            .with_medium(MediumConfig::hostile())
            .with_seed(12)
            .build()
            .unwrap();
        let watched = ids[2];
        let mut last = Frontier::new();
        for round in 0..150u64 {
            if round % 10 == 0 {
                for id in &ids {
                    sim.post(*id, "tick");
                }
            }
            sim.step();
            let current = sim.frontier(watched).unwrap();
            assert!(current.dominates(&last), "frontier went back at {}", sim.now());
            assert!(last.feeds().iter().all(|feed: &FeedId| current.contains(feed)));
            last = current;
        }
    }

    #[test]
    fn test_topic_multicast_reaches_exactly_subscribers() {
        let report = topic_multicast(6, 5, 4, MediumConfig::ideal(), 21, 300).unwrap();
        assert!(report.sent > 0);
        assert!(report.completed_at.is_some(), "{}", report.metrics);
        assert_eq!(report.delivered, report.expected);
        assert_eq!(report.misdelivered, 0);
    }

    #[test]
    fn test_topic_multicast_over_lossy_channel() {
        let report = topic_multicast(5, 4, 3, MediumConfig::poor(), 22, 3000).unwrap();
        assert!(report.completed_at.is_some(), "{}", report.metrics);
        assert_eq!(report.delivered, report.expected);
        assert_eq!(report.misdelivered, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn prop_converges_from_any_seed(seed in any::<u64>()) {
            let report = convergence(
                4,
                Layout::Ring { radius: 40.0 },
                MediumConfig::good(),
                2,
                seed,
                1000,
            )
            .unwrap();
            prop_assert!(report.converged(), "{}", report.metrics);
        }
    }
}
