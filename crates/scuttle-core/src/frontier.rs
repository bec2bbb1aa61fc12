//! Frontiers
//!
//! A frontier summarizes a store as "last index known per feed". Peers swap
//! frontiers and reply with the events the other side is missing. A feed
//! that is absent from a frontier is treated as index 0.

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

use crate::FeedId;

/// Last known index per feed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frontier {
    entries: BTreeMap<FeedId, u64>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feed: FeedId, index: u64) {
        self.entries.insert(feed, index);
    }

    pub fn remove(&mut self, feed: &FeedId) -> Option<u64> {
        self.entries.remove(feed)
    }

    /// Index for a feed that is part of this frontier
    pub fn get(&self, feed: &FeedId) -> Option<u64> {
        self.entries.get(feed).copied()
    }

    /// Index for any feed, 0 when absent
    pub fn index_of(&self, feed: &FeedId) -> u64 {
        self.get(feed).unwrap_or(0)
    }

    pub fn contains(&self, feed: &FeedId) -> bool {
        self.entries.contains_key(feed)
    }

    pub fn feeds(&self) -> BTreeSet<FeedId> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, FeedId, u64> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the index gaps over the feeds both frontiers know
    pub fn divergence(&self, other: &Frontier) -> u64 {
        self.entries
            .iter()
            .filter_map(|(feed, &index)| other.get(feed).map(|theirs| index.abs_diff(theirs)))
            .sum()
    }

    /// True when every feed known to both sides has the same index
    pub fn agrees_with(&self, other: &Frontier) -> bool {
        self.divergence(other) == 0
    }

    /// True when no feed of `self` is behind `other`
    pub fn dominates(&self, other: &Frontier) -> bool {
        other
            .iter()
            .all(|(feed, &index)| self.get(feed).map_or(true, |mine| mine >= index))
    }
}

impl FromIterator<(FeedId, u64)> for Frontier {
    fn from_iter<I: IntoIterator<Item = (FeedId, u64)>>(iter: I) -> Self {
        Frontier {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Frontier {
    type Item = (&'a FeedId, &'a u64);
    type IntoIter = btree_map::Iter<'a, FeedId, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
