//! Scenario construction

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use scuttle_broadcast::Position;
use scuttle_core::{GossipConfig, MediumConfig, RelayConfig, RelayId, ScuttleResult, SimConfig};

use crate::Simulation;

/// How relays are placed
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Layout {
    /// Along the x axis
    Line { spacing: f64 },
    /// Row by row
    Grid { columns: usize, spacing: f64 },
    /// Evenly around a circle
    Ring { radius: f64 },
    /// Uniform in a rectangle, drawn from the run's seed
    Random { width: f64, height: f64 },
}

impl Layout {
    /// Positions for `count` relays
    pub fn positions(&self, count: usize, seed: u64) -> Vec<Position> {
        match *self {
            Layout::Line { spacing } => (0..count)
                .map(|i| Position::new(i as f64 * spacing, 0.0))
                .collect(),
            Layout::Grid { columns, spacing } => {
                let columns = columns.max(1);
                (0..count)
                    .map(|i| {
                        Position::new(
                            (i % columns) as f64 * spacing,
                            (i / columns) as f64 * spacing,
                        )
                    })
                    .collect()
            }
            Layout::Ring { radius } => (0..count)
                .map(|i| {
                    let angle = std::f64::consts::TAU * i as f64 / count as f64;
                    Position::new(radius * angle.cos(), radius * angle.sin())
                })
                .collect(),
            Layout::Random { width, height } => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..count)
                    .map(|_| Position::new(rng.gen::<f64>() * width, rng.gen::<f64>() * height))
                    .collect()
            }
        }
    }
}

/// Builds a simulation with its relays already placed
#[derive(Clone, Debug)]
pub struct ScenarioBuilder {
    config: SimConfig,
    relays: usize,
    layout: Layout,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self {
            config: SimConfig::default(),
            relays: 4,
            layout: Layout::Line { spacing: 50.0 },
        }
    }
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set relay count
    pub fn with_relays(mut self, count: usize) -> Self {
        self.relays = count;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn with_medium(mut self, medium: MediumConfig) -> Self {
        self.config.medium = medium;
        self
    }

    pub fn with_relay_config(mut self, relay: RelayConfig) -> Self {
        self.config.relay = relay;
        self
    }

    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.config.gossip = gossip;
        self
    }

    /// Create the world; ids are returned in placement order
    pub fn build(self) -> ScuttleResult<(Simulation, Vec<RelayId>)> {
        let positions = self.layout.positions(self.relays, self.config.seed);
        let mut sim = Simulation::new(self.config)?;
        let ids = positions
            .into_iter()
            .map(|position| sim.add_relay(position))
            .collect();
        Ok((sim, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        let line = Layout::Line { spacing: 10.0 }.positions(3, 0);
        assert_eq!(line[2], Position::new(20.0, 0.0));

        let grid = Layout::Grid {
            columns: 2,
            spacing: 5.0,
        }
        .positions(3, 0);
        assert_eq!(grid[2], Position::new(0.0, 5.0));

        let ring = Layout::Ring { radius: 10.0 }.positions(4, 0);
        assert!((ring[0].distance_to(&ring[2]) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_random_layout_is_seeded() {
        let layout = Layout::Random {
            width: 100.0,
            height: 50.0,
        };
        assert_eq!(layout.positions(5, 9), layout.positions(5, 9));
        assert!(layout
            .positions(20, 3)
            .iter()
            .all(|p| (0.0..100.0).contains(&p.x) && (0.0..50.0).contains(&p.y)));
    }

    #[test]
    fn test_build() {
        let (sim, ids) = ScenarioBuilder::new()
            .with_relays(3)
            .with_medium(MediumConfig::ideal())
            .with_seed(11)
            .build()
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(sim.relay_count(), 3);
        assert_eq!(sim.config().seed, 11);
        // Spacing 50, range 100
        assert_eq!(sim.medium().neighbors(ids[0]), vec![ids[1], ids[2]]);
    }

    #[test]
    fn test_build_rejects_bad_config() {
        let medium = MediumConfig {
            broadcast_range: 0.0,
            ..MediumConfig::ideal()
        };
        assert!(ScenarioBuilder::new().with_medium(medium).build().is_err());
    }
}
