//! Interest policies - which feeds a store replicates
//!
//! Open replication takes every feed it hears about. Transitive interest
//! replicates the feeds the owner follows plus the feeds those follow, and
//! keeps blocked feeds out.

use std::collections::{BTreeMap, BTreeSet};

use scuttle_core::{BlockPolicy, FeedId, InterestMode};

use crate::{Log, Store};

/// Feeds added to or removed from a store by one policy pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InterestChanges {
    pub added: Vec<FeedId>,
    pub removed: Vec<FeedId>,
}

impl InterestChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Replication interest, chosen once per participant
#[derive(Debug, Clone)]
pub enum InterestPolicy {
    Open,
    Transitive(TransitiveInterest),
}

impl InterestPolicy {
    pub fn new(mode: InterestMode, owner: FeedId, block_policy: BlockPolicy) -> Self {
        match mode {
            InterestMode::Open => InterestPolicy::Open,
            InterestMode::Transitive => {
                InterestPolicy::Transitive(TransitiveInterest::new(owner, block_policy))
            }
        }
    }

    pub fn mode(&self) -> InterestMode {
        match self {
            InterestPolicy::Open => InterestMode::Open,
            InterestPolicy::Transitive(_) => InterestMode::Transitive,
        }
    }

    pub fn transitive(&self) -> Option<&TransitiveInterest> {
        match self {
            InterestPolicy::Transitive(interest) => Some(interest),
            InterestPolicy::Open => None,
        }
    }

    /// Feeds heard of through an id list, a frontier or an event author.
    /// Open replication starts following them; returns how many were new.
    pub fn discover<I>(&mut self, store: &mut Store, feeds: I) -> usize
    where
        I: IntoIterator<Item = FeedId>,
    {
        match self {
            InterestPolicy::Open => feeds.into_iter().filter(|feed| store.add_log(*feed)).count(),
            InterestPolicy::Transitive(_) => 0,
        }
    }

    /// A feed received new events; transitive interest re-reads its
    /// follows and blocks
    pub fn observe(&mut self, store: &Store, feed: &FeedId) {
        if let InterestPolicy::Transitive(interest) = self {
            interest.observe(store, feed);
        }
    }

    /// Bring the set of held feeds in line with the policy
    pub fn prepare_store(&mut self, store: &mut Store) -> InterestChanges {
        match self {
            InterestPolicy::Open => InterestChanges::default(),
            InterestPolicy::Transitive(interest) => interest.prepare_store(store),
        }
    }
}

/// Follow/block driven replication, one hop deep
#[derive(Debug, Clone)]
pub struct TransitiveInterest {
    owner: FeedId,
    block_policy: BlockPolicy,
    followed: BTreeSet<FeedId>,
    blocked: BTreeSet<FeedId>,
    /// Per directly followed peer, the feeds it follows
    followed_by_2nd: BTreeMap<FeedId, BTreeSet<FeedId>>,
    /// Per directly followed peer, the feeds it blocks
    blocked_by_2nd: BTreeMap<FeedId, BTreeSet<FeedId>>,
    /// Feeds held only because a followed peer follows them
    transitive: BTreeSet<FeedId>,
    /// Logs of blocked feeds kept under `BlockPolicy::Retain`
    archive: BTreeMap<FeedId, Log>,
}

impl TransitiveInterest {
    pub fn new(owner: FeedId, block_policy: BlockPolicy) -> Self {
        TransitiveInterest {
            owner,
            block_policy,
            followed: BTreeSet::new(),
            blocked: BTreeSet::new(),
            followed_by_2nd: BTreeMap::new(),
            blocked_by_2nd: BTreeMap::new(),
            transitive: BTreeSet::new(),
            archive: BTreeMap::new(),
        }
    }

    pub fn followed(&self) -> &BTreeSet<FeedId> {
        &self.followed
    }

    pub fn blocked(&self) -> &BTreeSet<FeedId> {
        &self.blocked
    }

    pub fn is_archived(&self, feed: &FeedId) -> bool {
        self.archive.contains_key(feed)
    }

    /// Feeds followed by the peers we follow, minus our blocks
    pub fn transitively_followed(&self) -> BTreeSet<FeedId> {
        self.followed_by_2nd
            .values()
            .flatten()
            .filter(|feed| !self.blocked.contains(feed) && **feed != self.owner)
            .copied()
            .collect()
    }

    /// Feeds blocked by the peers we follow that we do not follow ourselves
    pub fn transitively_blocked(&self) -> BTreeSet<FeedId> {
        let followed = self.transitively_followed();
        self.blocked_by_2nd
            .values()
            .flatten()
            .filter(|feed| {
                !self.followed.contains(feed) && !followed.contains(feed) && **feed != self.owner
            })
            .copied()
            .collect()
    }

    /// Refresh the second-hop maps from a directly followed peer's log
    pub fn observe(&mut self, store: &Store, feed: &FeedId) {
        if !self.followed.contains(feed) {
            return;
        }
        if let Some(log) = store.log(feed) {
            self.followed_by_2nd.insert(*feed, log.followed());
            self.blocked_by_2nd.insert(*feed, log.blocked());
        }
    }

    pub fn prepare_store(&mut self, store: &mut Store) -> InterestChanges {
        let mut changes = InterestChanges::default();
        let own = store.own_log();
        self.blocked = own.blocked();
        self.blocked.remove(&self.owner);
        self.followed = own.followed();
        self.followed.remove(&self.owner);
        self.followed.retain(|feed| !self.blocked.contains(feed));

        // Second-hop knowledge only comes from peers we still follow
        let followed = &self.followed;
        self.followed_by_2nd.retain(|peer, _| followed.contains(peer));
        self.blocked_by_2nd.retain(|peer, _| followed.contains(peer));
        for feed in self.followed.clone() {
            self.refresh_from_log(store, &feed);
        }

        for feed in self.followed.clone() {
            self.transitive.remove(&feed);
            if self.ensure_log(store, feed) {
                changes.added.push(feed);
            }
        }

        for feed in self.blocked.clone() {
            self.transitive.remove(&feed);
            if self.evict(store, &feed, true) {
                changes.removed.push(feed);
            }
        }

        let transitively_followed = self.transitively_followed();
        for feed in &transitively_followed {
            if !store.contains(feed) && self.ensure_log(store, *feed) {
                self.transitive.insert(*feed);
                changes.added.push(*feed);
            }
        }

        for feed in self.transitively_blocked() {
            self.transitive.remove(&feed);
            if self.evict(store, &feed, true) {
                changes.removed.push(feed);
            }
        }

        // Logs only held through a peer that no longer leads to them
        let orphans: Vec<FeedId> = self
            .transitive
            .iter()
            .filter(|feed| !transitively_followed.contains(feed) && !self.followed.contains(feed))
            .copied()
            .collect();
        for feed in orphans {
            self.transitive.remove(&feed);
            if self.evict(store, &feed, false) {
                changes.removed.push(feed);
            }
        }

        if !changes.is_empty() {
            tracing::debug!(
                owner = ?self.owner,
                added = changes.added.len(),
                removed = changes.removed.len(),
                "interest changed"
            );
        }
        changes
    }

    fn refresh_from_log(&mut self, store: &Store, feed: &FeedId) {
        if let Some(log) = store.log(feed) {
            if !log.is_empty() {
                self.followed_by_2nd.insert(*feed, log.followed());
                self.blocked_by_2nd.insert(*feed, log.blocked());
            }
        }
    }

    /// Hold a log for `feed`, restoring an archived one if there is one
    fn ensure_log(&mut self, store: &mut Store, feed: FeedId) -> bool {
        if store.contains(&feed) {
            return false;
        }
        match self.archive.remove(&feed) {
            Some(log) => store.insert_log(log),
            None => store.add_log(feed),
        }
    }

    fn evict(&mut self, store: &mut Store, feed: &FeedId, blocked: bool) -> bool {
        match store.remove_log(feed) {
            Some(log) => {
                if blocked && self.block_policy == BlockPolicy::Retain {
                    self.archive.insert(*feed, log);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttle_core::{Content, Frontier};
    use scuttle_crypto::Identity;

    fn transitive(owner: &Identity, block_policy: BlockPolicy) -> InterestPolicy {
        InterestPolicy::new(InterestMode::Transitive, owner.feed_id(), block_policy)
    }

    /// One-way pull of everything `from` holds that `to` replicates
    fn pull(to: &mut Store, from: &Store) {
        let frontier = to.frontier(&to.ids());
        let news = from.events_since(&frontier);
        to.update(news);
    }

    #[test]
    fn test_open_discovers_everything() {
        let a = Identity::generate();
        let mut store = Store::new(a.feed_id());
        let mut policy = InterestPolicy::new(InterestMode::Open, a.feed_id(), BlockPolicy::Purge);

        let found = policy.discover(&mut store, [FeedId([1; 32]), FeedId([2; 32]), a.feed_id()]);
        assert_eq!(found, 2);
        assert_eq!(store.len(), 3);
        assert!(policy.prepare_store(&mut store).is_empty());
    }

    #[test]
    fn test_transitive_ignores_discovery() {
        let a = Identity::generate();
        let mut store = Store::new(a.feed_id());
        let mut policy = transitive(&a, BlockPolicy::Purge);

        assert_eq!(policy.discover(&mut store, [FeedId([1; 32])]), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_follow_adds_log() {
        let a = Identity::generate();
        let b = Identity::generate();
        let mut store = Store::new(a.feed_id());
        let mut policy = transitive(&a, BlockPolicy::Purge);

        store.append_local(Content::Follow(b.feed_id()), &a);
        let changes = policy.prepare_store(&mut store);

        assert_eq!(changes.added, vec![b.feed_id()]);
        assert!(store.contains(&b.feed_id()));
    }

    #[test]
    fn test_follow_then_block_scenario() {
        let a = Identity::generate();
        let b = Identity::generate();
        let c = Identity::generate();

        let mut store_a = Store::new(a.feed_id());
        let mut policy_a = transitive(&a, BlockPolicy::Purge);
        store_a.append_local(Content::Follow(b.feed_id()), &a);
        policy_a.prepare_store(&mut store_a);

        let mut store_b = Store::new(b.feed_id());
        store_b.append_local(Content::Follow(c.feed_id()), &b);

        // A and B sync
        pull(&mut store_a, &store_b);
        policy_a.observe(&store_a, &b.feed_id());
        policy_a.prepare_store(&mut store_a);

        let interest = policy_a.transitive().unwrap();
        assert!(interest.transitively_followed().contains(&c.feed_id()));
        assert!(store_a.contains(&c.feed_id()));

        // A blocks B: B goes, and C with it since nothing else leads there
        store_a.append_local(Content::Block(b.feed_id()), &a);
        let changes = policy_a.prepare_store(&mut store_a);

        assert!(!store_a.contains(&b.feed_id()));
        assert!(!store_a.contains(&c.feed_id()));
        assert!(changes.removed.contains(&b.feed_id()));
        assert!(changes.removed.contains(&c.feed_id()));
        assert!(policy_a.transitive().unwrap().transitively_followed().is_empty());
    }

    #[test]
    fn test_transitively_blocked_feed_is_removed() {
        let a = Identity::generate();
        let b = Identity::generate();
        let x = FeedId([9; 32]);

        let mut store_a = Store::new(a.feed_id());
        let mut policy_a = transitive(&a, BlockPolicy::Purge);
        store_a.append_local(Content::Follow(b.feed_id()), &a);
        store_a.add_log(x);
        policy_a.prepare_store(&mut store_a);

        let mut store_b = Store::new(b.feed_id());
        store_b.append_local(Content::Block(x), &b);
        pull(&mut store_a, &store_b);
        policy_a.observe(&store_a, &b.feed_id());
        policy_a.prepare_store(&mut store_a);

        assert!(policy_a.transitive().unwrap().transitively_blocked().contains(&x));
        assert!(!store_a.contains(&x));
    }

    #[test]
    fn test_own_follow_beats_peer_block() {
        let a = Identity::generate();
        let b = Identity::generate();
        let x = Identity::generate();

        let mut store_a = Store::new(a.feed_id());
        let mut policy_a = transitive(&a, BlockPolicy::Purge);
        store_a.append_local(Content::Follow(b.feed_id()), &a);
        store_a.append_local(Content::Follow(x.feed_id()), &a);
        policy_a.prepare_store(&mut store_a);

        let mut store_b = Store::new(b.feed_id());
        store_b.append_local(Content::Block(x.feed_id()), &b);
        pull(&mut store_a, &store_b);
        policy_a.observe(&store_a, &b.feed_id());
        policy_a.prepare_store(&mut store_a);

        assert!(store_a.contains(&x.feed_id()));
    }

    #[test]
    fn test_owner_never_removed() {
        let a = Identity::generate();
        let mut store = Store::new(a.feed_id());
        let mut policy = transitive(&a, BlockPolicy::Purge);

        store.append_local(Content::Block(a.feed_id()), &a);
        policy.prepare_store(&mut store);
        assert!(store.contains(&a.feed_id()));
        assert!(policy.transitive().unwrap().blocked().is_empty());
    }

    #[test]
    fn test_retain_policy_archives_and_restores() {
        let a = Identity::generate();
        let b = Identity::generate();

        let mut store_b = Store::new(b.feed_id());
        store_b.append_local(Content::Post(b"one".to_vec()), &b);
        store_b.append_local(Content::Post(b"two".to_vec()), &b);

        let mut store_a = Store::new(a.feed_id());
        let mut policy = transitive(&a, BlockPolicy::Retain);
        store_a.append_local(Content::Follow(b.feed_id()), &a);
        policy.prepare_store(&mut store_a);
        pull(&mut store_a, &store_b);

        store_a.append_local(Content::Block(b.feed_id()), &a);
        policy.prepare_store(&mut store_a);
        assert!(!store_a.contains(&b.feed_id()));
        assert!(policy.transitive().unwrap().is_archived(&b.feed_id()));

        store_a.append_local(Content::Unblock(b.feed_id()), &a);
        policy.prepare_store(&mut store_a);
        assert_eq!(store_a.log(&b.feed_id()).unwrap().last_index(), 2);
        assert!(!policy.transitive().unwrap().is_archived(&b.feed_id()));

        let frontier: Frontier = store_a.frontier(&[b.feed_id()]);
        assert_eq!(frontier.get(&b.feed_id()), Some(2));
    }

    #[test]
    fn test_purge_policy_drops_history() {
        let a = Identity::generate();
        let b = Identity::generate();

        let mut store_b = Store::new(b.feed_id());
        store_b.append_local(Content::Post(b"one".to_vec()), &b);

        let mut store_a = Store::new(a.feed_id());
        let mut policy = transitive(&a, BlockPolicy::Purge);
        store_a.append_local(Content::Follow(b.feed_id()), &a);
        policy.prepare_store(&mut store_a);
        pull(&mut store_a, &store_b);

        store_a.append_local(Content::Block(b.feed_id()), &a);
        policy.prepare_store(&mut store_a);
        store_a.append_local(Content::Unblock(b.feed_id()), &a);
        policy.prepare_store(&mut store_a);

        assert_eq!(store_a.log(&b.feed_id()).unwrap().last_index(), 0);
    }
}
