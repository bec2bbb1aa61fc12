//! Feed store and frontier reconciliation
//!
//! Reconciliation is a delta exchange: each side sends its frontier, the
//! other answers with every event past it, and the receiver appends what it
//! does not have yet. Applying the same news twice changes nothing.

use std::collections::{BTreeMap, BTreeSet};

use scuttle_core::{Content, Event, FeedId, Frontier, News, ScuttleError};
use scuttle_crypto::Identity;

use crate::Log;

/// Outcome of applying a news batch
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateReport {
    /// Events appended per feed
    pub appended: BTreeMap<FeedId, u64>,
    /// Events already present locally
    pub stale: u64,
    /// Feeds whose batch stopped at an invalid event
    pub rejected: BTreeMap<FeedId, ScuttleError>,
    /// Feeds in the batch that this store does not replicate
    pub unknown: Vec<FeedId>,
}

impl UpdateReport {
    pub fn total_appended(&self) -> u64 {
        self.appended.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Why each skipped feed was not applied, rejections first
    pub fn errors(&self) -> impl Iterator<Item = ScuttleError> + '_ {
        self.rejected.values().cloned().chain(
            self.unknown
                .iter()
                .map(|feed| ScuttleError::UnknownIdentity(*feed)),
        )
    }
}

/// The feeds one participant holds; always includes its own
#[derive(Clone, Debug)]
pub struct Store {
    own: Log,
    logs: BTreeMap<FeedId, Log>,
}

impl Store {
    pub fn new(owner: FeedId) -> Self {
        Store {
            own: Log::new(owner),
            logs: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> FeedId {
        self.own.feed()
    }

    pub fn own_log(&self) -> &Log {
        &self.own
    }

    pub fn contains(&self, feed: &FeedId) -> bool {
        *feed == self.owner() || self.logs.contains_key(feed)
    }

    pub fn log(&self, feed: &FeedId) -> Option<&Log> {
        if *feed == self.owner() {
            Some(&self.own)
        } else {
            self.logs.get(feed)
        }
    }

    fn log_mut(&mut self, feed: &FeedId) -> Option<&mut Log> {
        if *feed == self.own.feed() {
            Some(&mut self.own)
        } else {
            self.logs.get_mut(feed)
        }
    }

    /// Every feed held, own feed included
    pub fn ids(&self) -> BTreeSet<FeedId> {
        let mut ids: BTreeSet<FeedId> = self.logs.keys().copied().collect();
        ids.insert(self.owner());
        ids
    }

    pub fn logs(&self) -> impl Iterator<Item = &Log> {
        std::iter::once(&self.own).chain(self.logs.values())
    }

    /// Number of feeds held
    pub fn len(&self) -> usize {
        self.logs.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn total_events(&self) -> usize {
        self.logs().map(Log::len).sum()
    }

    /// Start replicating a feed; false if it was already held
    pub fn add_log(&mut self, feed: FeedId) -> bool {
        if self.contains(&feed) {
            return false;
        }
        tracing::trace!(feed = ?feed, "replicating feed");
        self.logs.insert(feed, Log::new(feed));
        true
    }

    /// Put back a previously removed log; false if the feed is already held
    pub fn insert_log(&mut self, log: Log) -> bool {
        if self.contains(&log.feed()) {
            return false;
        }
        self.logs.insert(log.feed(), log);
        true
    }

    /// Stop replicating a feed; the owner's log can never be removed
    pub fn remove_log(&mut self, feed: &FeedId) -> Option<Log> {
        let removed = self.logs.remove(feed);
        if removed.is_some() {
            tracing::trace!(feed = ?feed, "dropped feed");
        }
        removed
    }

    /// Sign new content into the owner's feed
    pub fn append_local(&mut self, content: Content, identity: &Identity) -> Event {
        self.own.append(content, identity)
    }

    /// Last index of each requested feed this store holds
    pub fn frontier<'a, I>(&self, ids: I) -> Frontier
    where
        I: IntoIterator<Item = &'a FeedId>,
    {
        ids.into_iter()
            .filter_map(|feed| self.log(feed).map(|log| (*feed, log.last_index())))
            .collect()
    }

    /// Frontier over every feed held
    pub fn full_frontier(&self) -> Frontier {
        self.logs().map(|log| (log.feed(), log.last_index())).collect()
    }

    /// Events the peer is missing, for feeds both sides hold
    pub fn events_since(&self, peer: &Frontier) -> News {
        let mut news = News::new();
        for (feed, &theirs) in peer {
            if let Some(log) = self.log(feed) {
                let missing = log.since(theirs);
                if !missing.is_empty() {
                    news.insert(*feed, missing.to_vec());
                }
            }
        }
        news
    }

    /// Apply news from a peer
    ///
    /// Per feed, events the log already holds are skipped, the rest are
    /// verified and appended in order until the first invalid one.
    pub fn update(&mut self, news: News) -> UpdateReport {
        let mut report = UpdateReport::default();

        for (feed, events) in news {
            let Some(log) = self.log_mut(&feed) else {
                tracing::trace!(error = %ScuttleError::UnknownIdentity(feed), "news ignored");
                report.unknown.push(feed);
                continue;
            };

            let mut appended = 0;
            for event in events {
                if event.index <= log.last_index() {
                    report.stale += 1;
                    continue;
                }
                match log.verify_and_append(event) {
                    Ok(()) => appended += 1,
                    Err(err) => {
                        tracing::warn!(feed = ?feed, error = %err, "rejected replicated event");
                        report.rejected.insert(feed, err);
                        break;
                    }
                }
            }
            if appended > 0 {
                report.appended.insert(feed, appended);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use scuttle_core::ChainFault;

    fn post(text: &str) -> Content {
        Content::Post(text.as_bytes().to_vec())
    }

    fn store_with_posts(identity: &Identity, count: usize) -> Store {
        let mut store = Store::new(identity.feed_id());
        for i in 0..count {
            store.append_local(post(&format!("{}", i)), identity);
        }
        store
    }

    #[test]
    fn test_own_log_always_present() {
        let identity = Identity::generate();
        let mut store = Store::new(identity.feed_id());

        assert!(store.contains(&identity.feed_id()));
        assert!(store.remove_log(&identity.feed_id()).is_none());
        assert!(!store.add_log(identity.feed_id()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_frontier_omits_unknown_feeds() {
        let a = Identity::generate();
        let store = store_with_posts(&a, 3);
        let unknown = FeedId([1; 32]);

        let frontier = store.frontier(&[a.feed_id(), unknown]);
        assert_eq!(frontier.get(&a.feed_id()), Some(3));
        assert!(!frontier.contains(&unknown));
    }

    #[test]
    fn test_hello_reconciliation() {
        let a = Identity::generate();
        let b = Identity::generate();
        let mut store_a = Store::new(a.feed_id());
        let mut store_b = Store::new(b.feed_id());
        store_a.append_local(post("hello"), &a);
        store_a.add_log(b.feed_id());
        store_b.add_log(a.feed_id());

        let frontier_b = store_b.frontier(&store_a.ids());
        assert_eq!(frontier_b.get(&a.feed_id()), Some(0));

        let news = store_a.events_since(&frontier_b);
        assert_eq!(news.len(), 1);
        assert_eq!(news[&a.feed_id()].len(), 1);

        let report = store_b.update(news);
        assert_eq!(report.appended.get(&a.feed_id()), Some(&1));
        assert_eq!(store_b.log(&a.feed_id()).unwrap().last_index(), 1);
    }

    #[test]
    fn test_events_since_absent_means_nothing_and_zero_means_all() {
        let a = Identity::generate();
        let store = store_with_posts(&a, 4);

        assert!(store.events_since(&Frontier::new()).is_empty());

        let zero: Frontier = [(a.feed_id(), 0)].into_iter().collect();
        assert_eq!(store.events_since(&zero)[&a.feed_id()].len(), 4);

        let caught_up: Frontier = [(a.feed_id(), 4)].into_iter().collect();
        assert!(store.events_since(&caught_up).is_empty());
    }

    #[test]
    fn test_update_ignores_unknown_feed() {
        let a = Identity::generate();
        let b = Identity::generate();
        let source = store_with_posts(&a, 2);
        let mut target = Store::new(b.feed_id());

        let full: Frontier = [(a.feed_id(), 0)].into_iter().collect();
        let report = target.update(source.events_since(&full));

        assert_eq!(report.unknown, vec![a.feed_id()]);
        assert!(report.is_clean());
        assert_eq!(
            report.errors().collect::<Vec<_>>(),
            vec![ScuttleError::UnknownIdentity(a.feed_id())]
        );
        assert_eq!(report.total_appended(), 0);
        assert!(!target.contains(&a.feed_id()));
    }

    #[test]
    fn test_update_stops_at_first_invalid_event() {
        let a = Identity::generate();
        let b = Identity::generate();
        let source = store_with_posts(&a, 3);
        let mut target = Store::new(b.feed_id());
        target.add_log(a.feed_id());

        let mut events = source.own_log().events().to_vec();
        events[1].content = post("tampered");
        let mut news = News::new();
        news.insert(a.feed_id(), events);

        let report = target.update(news);
        assert_eq!(report.appended.get(&a.feed_id()), Some(&1));
        assert_eq!(report.rejected.get(&a.feed_id()), Some(&ScuttleError::InvalidSignature));
        assert_eq!(target.log(&a.feed_id()).unwrap().last_index(), 1);
    }

    #[test]
    fn test_update_reports_gap() {
        let a = Identity::generate();
        let b = Identity::generate();
        let source = store_with_posts(&a, 3);
        let mut target = Store::new(b.feed_id());
        target.add_log(a.feed_id());

        let mut news = News::new();
        news.insert(a.feed_id(), source.own_log().events()[2..].to_vec());

        let report = target.update(news);
        assert!(matches!(
            report.rejected.get(&a.feed_id()),
            Some(ScuttleError::ChainViolation {
                fault: ChainFault::IndexGap { expected: 1, actual: 3 },
                ..
            })
        ));
    }

    #[test]
    fn test_overlapping_batches_skip_stale_events() {
        let a = Identity::generate();
        let b = Identity::generate();
        let source = store_with_posts(&a, 5);
        let mut target = Store::new(b.feed_id());
        target.add_log(a.feed_id());

        let mut first = News::new();
        first.insert(a.feed_id(), source.own_log().events()[..3].to_vec());
        target.update(first);

        // A concurrent session computed its news against the old frontier
        let mut second = News::new();
        second.insert(a.feed_id(), source.own_log().events()[1..].to_vec());
        let report = target.update(second);

        assert_eq!(report.stale, 2);
        assert_eq!(report.appended.get(&a.feed_id()), Some(&2));
        assert!(report.is_clean());
        assert_eq!(target.log(&a.feed_id()).unwrap().last_index(), 5);
    }

    #[test]
    fn test_removed_log_can_be_restored() {
        let a = Identity::generate();
        let b = Identity::generate();
        let source = store_with_posts(&a, 2);
        let mut target = Store::new(b.feed_id());
        target.add_log(a.feed_id());
        target.update(source.events_since(&[(a.feed_id(), 0)].into_iter().collect()));

        let archived = target.remove_log(&a.feed_id()).unwrap();
        assert!(!target.contains(&a.feed_id()));
        assert!(target.insert_log(archived));
        assert_eq!(target.log(&a.feed_id()).unwrap().last_index(), 2);
    }

    proptest! {
        #[test]
        fn prop_update_is_idempotent(count in 1usize..10, split in 0usize..10) {
            let a = Identity::from_bytes(&[21u8; 32]);
            let b = Identity::from_bytes(&[22u8; 32]);
            let source = store_with_posts(&a, count);
            let mut target = Store::new(b.feed_id());
            target.add_log(a.feed_id());

            let start: Frontier = [(a.feed_id(), (split % count) as u64)].into_iter().collect();
            let mut prefix = News::new();
            prefix.insert(a.feed_id(), source.own_log().events()[..split % count].to_vec());
            target.update(prefix);

            let news = source.events_since(&start);
            target.update(news.clone());
            let frontier = target.full_frontier();
            let again = target.update(news);

            prop_assert_eq!(again.total_appended(), 0);
            prop_assert_eq!(target.full_frontier(), frontier);
            prop_assert_eq!(target.log(&a.feed_id()).unwrap().last_index(), count as u64);
        }
    }
}
