//! Topology - where relays are and who hears whom
//!
//! Placement is owned by an outside collaborator behind the `Topology`
//! trait. The medium caches what it needs in a `NeighborTable` and
//! refreshes it periodically, so movement shows up with some delay.

use std::collections::BTreeMap;

use scuttle_core::RelayId;

/// Spatial queries the medium needs
pub trait Topology {
    /// Relays other than `relay` within `radius` of it
    fn neighbors_within(&self, relay: RelayId, radius: f64) -> Vec<RelayId>;

    /// Distance between two placed relays
    fn distance(&self, a: RelayId, b: RelayId) -> Option<f64>;
}

/// Point in the plane
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Euclidean placement of relays
#[derive(Debug, Clone, Default)]
pub struct Placement {
    positions: BTreeMap<RelayId, Position>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place or move a relay
    pub fn place(&mut self, relay: RelayId, position: Position) {
        self.positions.insert(relay, position);
    }

    pub fn remove(&mut self, relay: RelayId) -> Option<Position> {
        self.positions.remove(&relay)
    }

    pub fn position(&self, relay: RelayId) -> Option<Position> {
        self.positions.get(&relay).copied()
    }

    pub fn relays(&self) -> impl Iterator<Item = RelayId> + '_ {
        self.positions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl Topology for Placement {
    fn neighbors_within(&self, relay: RelayId, radius: f64) -> Vec<RelayId> {
        let Some(origin) = self.positions.get(&relay) else {
            return Vec::new();
        };
        self.positions
            .iter()
            .filter(|(id, position)| **id != relay && origin.distance_to(position) <= radius)
            .map(|(id, _)| *id)
            .collect()
    }

    fn distance(&self, a: RelayId, b: RelayId) -> Option<f64> {
        Some(self.positions.get(&a)?.distance_to(self.positions.get(&b)?))
    }
}

/// Directed link as seen by the sender
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub to: RelayId,
    pub distance: f64,
    /// Propagation delay in ticks
    pub latency: f64,
}

/// Per-relay neighbor and latency cache
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    links: BTreeMap<RelayId, Vec<Link>>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the links of every relay in `relays`
    pub fn refresh<I>(&mut self, topology: &dyn Topology, relays: I, range: f64, speed: f64)
    where
        I: IntoIterator<Item = RelayId>,
    {
        self.links.clear();
        for relay in relays {
            let links = topology
                .neighbors_within(relay, range)
                .into_iter()
                .filter_map(|to| {
                    let distance = topology.distance(relay, to)?;
                    Some(Link {
                        to,
                        distance,
                        latency: distance / speed,
                    })
                })
                .collect();
            self.links.insert(relay, links);
        }
    }

    pub fn links(&self, relay: RelayId) -> &[Link] {
        self.links.get(&relay).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn link(&self, from: RelayId, to: RelayId) -> Option<Link> {
        self.links(from).iter().find(|link| link.to == to).copied()
    }

    pub fn neighbors(&self, relay: RelayId) -> Vec<RelayId> {
        self.links(relay).iter().map(|link| link.to).collect()
    }

    /// Drop a relay and every link towards it
    pub fn forget(&mut self, relay: RelayId) {
        self.links.remove(&relay);
        for links in self.links.values_mut() {
            links.retain(|link| link.to != relay);
        }
    }

    /// Number of directed links
    pub fn link_count(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(count: u64, spacing: f64) -> Placement {
        let mut placement = Placement::new();
        for i in 0..count {
            placement.place(RelayId(i), Position::new(i as f64 * spacing, 0.0));
        }
        placement
    }

    #[test]
    fn test_neighbors_within_range() {
        let placement = line(4, 10.0);
        assert_eq!(placement.neighbors_within(RelayId(1), 10.0), vec![RelayId(0), RelayId(2)]);
        assert_eq!(placement.neighbors_within(RelayId(0), 25.0), vec![RelayId(1), RelayId(2)]);
        assert!(placement.neighbors_within(RelayId(9), 100.0).is_empty());
        assert_eq!(placement.distance(RelayId(0), RelayId(3)), Some(30.0));
    }

    #[test]
    fn test_neighbor_table_latency() {
        let placement = line(3, 50.0);
        let mut table = NeighborTable::new();
        table.refresh(&placement, placement.relays(), 60.0, 100.0);

        assert_eq!(table.neighbors(RelayId(1)), vec![RelayId(0), RelayId(2)]);
        let link = table.link(RelayId(0), RelayId(1)).unwrap();
        assert_eq!(link.distance, 50.0);
        assert_eq!(link.latency, 0.5);
        assert!(table.link(RelayId(0), RelayId(2)).is_none());
        assert_eq!(table.link_count(), 4);
    }

    #[test]
    fn test_refresh_follows_movement() {
        let mut placement = line(2, 50.0);
        let mut table = NeighborTable::new();
        table.refresh(&placement, placement.relays(), 60.0, 100.0);
        assert_eq!(table.neighbors(RelayId(0)), vec![RelayId(1)]);

        placement.place(RelayId(1), Position::new(500.0, 0.0));
        // Stale until the next refresh
        assert_eq!(table.neighbors(RelayId(0)), vec![RelayId(1)]);
        table.refresh(&placement, placement.relays(), 60.0, 100.0);
        assert!(table.neighbors(RelayId(0)).is_empty());
    }

    #[test]
    fn test_forget() {
        let placement = line(3, 10.0);
        let mut table = NeighborTable::new();
        table.refresh(&placement, placement.relays(), 100.0, 1.0);
        table.forget(RelayId(1));

        assert!(table.links(RelayId(1)).is_empty());
        assert_eq!(table.neighbors(RelayId(0)), vec![RelayId(2)]);
    }
}
