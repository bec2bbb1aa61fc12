//! Append-only feeds
//!
//! A `Log` holds the events of one feed in index order without gaps. It
//! only grows through `append` (the owner signing a new event) or
//! `verify_and_append` (a replica checking an event received from a peer).

use std::collections::BTreeSet;

use scuttle_core::{ChainFault, Content, Event, EventHash, FeedId, ScuttleError, ScuttleResult};
use scuttle_crypto::{hash_event, sign_event, verify_event, Identity};

/// One feed, owned locally or replicated
#[derive(Clone, Debug)]
pub struct Log {
    feed: FeedId,
    events: Vec<Event>,
    /// Hash of the last event, what the next event must link to
    last_hash: Option<EventHash>,
}

impl Log {
    pub fn new(feed: FeedId) -> Self {
        Log {
            feed,
            events: Vec::new(),
            last_hash: None,
        }
    }

    pub fn feed(&self) -> FeedId {
        self.feed
    }

    /// Index of the last event, 0 for an empty log
    pub fn last_index(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event at a 1-based index
    pub fn get(&self, index: u64) -> Option<&Event> {
        let position = usize::try_from(index.checked_sub(1)?).ok()?;
        self.events.get(position)
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Sign and append new content; `identity` must own this feed
    pub fn append(&mut self, content: Content, identity: &Identity) -> Event {
        debug_assert_eq!(identity.feed_id(), self.feed);

        let unsigned = Event::unsigned(self.feed, self.last_hash, self.last_index() + 1, content);
        let event = sign_event(identity, unsigned);
        self.push(event.clone());
        event
    }

    /// Append an event received from elsewhere after checking its signature
    /// and its place in the chain
    pub fn verify_and_append(&mut self, event: Event) -> ScuttleResult<()> {
        verify_event(&self.feed, &event)?;
        self.check_link(&event)?;
        self.push(event);
        Ok(())
    }

    fn check_link(&self, event: &Event) -> ScuttleResult<()> {
        let expected = self.last_index() + 1;
        if event.index != expected {
            return Err(ScuttleError::ChainViolation {
                feed: self.feed,
                fault: ChainFault::IndexGap {
                    expected,
                    actual: event.index,
                },
            });
        }
        if event.previous != self.last_hash {
            return Err(ScuttleError::ChainViolation {
                feed: self.feed,
                fault: ChainFault::BrokenLink { index: event.index },
            });
        }
        Ok(())
    }

    fn push(&mut self, event: Event) {
        self.last_hash = Some(hash_event(&event));
        self.events.push(event);
    }

    /// Events with an index strictly greater than `index`
    pub fn since(&self, index: u64) -> &[Event] {
        let start = usize::try_from(index).map_or(self.events.len(), |i| i.min(self.events.len()));
        &self.events[start..]
    }

    /// Feeds this author currently follows, last follow/unfollow wins
    pub fn followed(&self) -> BTreeSet<FeedId> {
        let mut followed = BTreeSet::new();
        for event in &self.events {
            match event.content {
                Content::Follow(target) => {
                    followed.insert(target);
                }
                Content::Unfollow(target) => {
                    followed.remove(&target);
                }
                _ => {}
            }
        }
        followed
    }

    /// Feeds this author currently blocks, last block/unblock wins
    pub fn blocked(&self) -> BTreeSet<FeedId> {
        let mut blocked = BTreeSet::new();
        for event in &self.events {
            match event.content {
                Content::Block(target) => {
                    blocked.insert(target);
                }
                Content::Unblock(target) => {
                    blocked.remove(&target);
                }
                _ => {}
            }
        }
        blocked
    }

    /// Re-verify every signature and link of the chain
    pub fn check_integrity(&self) -> ScuttleResult<()> {
        let mut replica = Log::new(self.feed);
        for event in &self.events {
            replica.verify_and_append(event.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn post(text: &str) -> Content {
        Content::Post(text.as_bytes().to_vec())
    }

    fn authored(identity: &Identity, count: usize) -> Log {
        let mut log = Log::new(identity.feed_id());
        for i in 0..count {
            log.append(post(&format!("post {}", i)), identity);
        }
        log
    }

    #[test]
    fn test_append_builds_chain() {
        let identity = Identity::generate();
        let log = authored(&identity, 3);

        assert_eq!(log.last_index(), 3);
        assert_eq!(log.get(1).unwrap().previous, None);
        assert_eq!(log.get(2).unwrap().previous, Some(hash_event(log.get(1).unwrap())));
        assert_eq!(log.get(3).unwrap().previous, Some(hash_event(log.get(2).unwrap())));
        assert!(log.get(0).is_none());
        assert!(log.get(4).is_none());
        assert!(log.check_integrity().is_ok());
    }

    #[test]
    fn test_replica_accepts_in_order() {
        let identity = Identity::generate();
        let source = authored(&identity, 4);
        let mut replica = Log::new(identity.feed_id());

        for event in source.events() {
            replica.verify_and_append(event.clone()).unwrap();
        }
        assert_eq!(replica.last_index(), 4);
        assert_eq!(replica.last(), source.last());
    }

    #[test]
    fn test_gap_is_chain_violation() {
        let identity = Identity::generate();
        let source = authored(&identity, 3);
        let mut replica = Log::new(identity.feed_id());
        replica.verify_and_append(source.events()[0].clone()).unwrap();

        let result = replica.verify_and_append(source.events()[2].clone());
        assert_eq!(
            result,
            Err(ScuttleError::ChainViolation {
                feed: identity.feed_id(),
                fault: ChainFault::IndexGap {
                    expected: 2,
                    actual: 3
                },
            })
        );
        assert_eq!(replica.last_index(), 1);
    }

    #[test]
    fn test_fork_is_chain_violation() {
        let identity = Identity::generate();
        let honest = authored(&identity, 2);

        // Second event signed correctly but linked to nothing
        let forged = sign_event(
            &identity,
            Event::unsigned(identity.feed_id(), Some([0u8; 32]), 2, post("fork")),
        );
        let mut replica = Log::new(identity.feed_id());
        replica.verify_and_append(honest.events()[0].clone()).unwrap();

        assert!(matches!(
            replica.verify_and_append(forged),
            Err(ScuttleError::ChainViolation {
                fault: ChainFault::BrokenLink { index: 2 },
                ..
            })
        ));
    }

    #[test]
    fn test_tampered_event_is_invalid_signature() {
        let identity = Identity::generate();
        let source = authored(&identity, 1);
        let mut tampered = source.events()[0].clone();
        tampered.content = post("edited");

        let mut replica = Log::new(identity.feed_id());
        assert_eq!(
            replica.verify_and_append(tampered),
            Err(ScuttleError::InvalidSignature)
        );
        assert!(replica.is_empty());
    }

    #[test]
    fn test_event_from_other_author_rejected() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let bobs = authored(&bob, 1);

        let mut alices_replica = Log::new(alice.feed_id());
        assert_eq!(
            alices_replica.verify_and_append(bobs.events()[0].clone()),
            Err(ScuttleError::InvalidSignature)
        );
    }

    #[test]
    fn test_since() {
        let identity = Identity::generate();
        let log = authored(&identity, 5);

        assert_eq!(log.since(0).len(), 5);
        assert_eq!(log.since(3).len(), 2);
        assert_eq!(log.since(3)[0].index, 4);
        assert!(log.since(5).is_empty());
        assert!(log.since(99).is_empty());
    }

    #[test]
    fn test_followed_and_blocked_last_writer_wins() {
        let identity = Identity::generate();
        let b = FeedId([2; 32]);
        let c = FeedId([3; 32]);
        let mut log = Log::new(identity.feed_id());

        log.append(Content::Follow(b), &identity);
        log.append(Content::Follow(c), &identity);
        log.append(Content::Unfollow(b), &identity);
        log.append(Content::Block(b), &identity);
        log.append(Content::Block(c), &identity);
        log.append(Content::Unblock(c), &identity);

        assert_eq!(log.followed(), [c].into_iter().collect());
        assert_eq!(log.blocked(), [b].into_iter().collect());
    }

    proptest! {
        #[test]
        fn prop_replicated_chain_stays_valid(posts in proptest::collection::vec(".{0,16}", 1..12)) {
            let identity = Identity::from_bytes(&[11u8; 32]);
            let mut source = Log::new(identity.feed_id());
            for text in &posts {
                source.append(post(text), &identity);
            }

            let mut replica = Log::new(identity.feed_id());
            for event in source.events() {
                prop_assert!(replica.verify_and_append(event.clone()).is_ok());
            }
            prop_assert_eq!(replica.last_index(), posts.len() as u64);
            prop_assert!(replica.check_integrity().is_ok());
            // Replaying any accepted event is refused
            prop_assert!(replica.verify_and_append(source.events()[0].clone()).is_err());
        }
    }
}
