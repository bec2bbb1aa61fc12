//! Medium observers
//!
//! Observers receive the medium's event stream. They are boxed into the
//! medium, so each one keeps its data behind a shared handle that the
//! test or renderer holding a clone can read at any time.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use scuttle_broadcast::{LossCause, MediumEvent, MediumObserver};
use scuttle_core::RelayId;

/// Keeps every event in order
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<MediumEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<MediumEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&MediumEvent) -> bool,
    {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    pub fn losses(&self, cause: LossCause) -> usize {
        self.count(|event| matches!(event, MediumEvent::Lost { cause: c, .. } if *c == cause))
    }

    /// Take the recorded events, leaving the buffer empty
    pub fn drain(&self) -> Vec<MediumEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl MediumObserver for RecordingObserver {
    fn on_event(&mut self, event: &MediumEvent) {
        self.events.lock().push(event.clone());
    }
}

impl std::fmt::Debug for RecordingObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingObserver")
            .field("events", &self.len())
            .finish()
    }
}

/// Traffic on one directed link
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkCounters {
    pub delivered: u64,
    pub lost: u64,
}

/// Per-link traffic, the edge view of the network
#[derive(Clone, Default, Debug)]
pub struct LinkActivity {
    links: Arc<Mutex<BTreeMap<(RelayId, RelayId), LinkCounters>>>,
}

impl LinkActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, from: RelayId, to: RelayId) -> LinkCounters {
        self.links.lock().get(&(from, to)).copied().unwrap_or_default()
    }

    /// Links that carried at least one frame
    pub fn active_links(&self) -> Vec<(RelayId, RelayId)> {
        self.links
            .lock()
            .iter()
            .filter(|(_, counters)| counters.delivered > 0)
            .map(|(link, _)| *link)
            .collect()
    }
}

impl MediumObserver for LinkActivity {
    fn on_event(&mut self, event: &MediumEvent) {
        let mut links = self.links.lock();
        match event {
            MediumEvent::Delivered { from, to, .. } => {
                links.entry((*from, *to)).or_default().delivered += 1;
            }
            MediumEvent::Lost { from, to, .. } => {
                links.entry((*from, *to)).or_default().lost += 1;
            }
            MediumEvent::Sent { .. } | MediumEvent::Deferred { .. } => {}
        }
    }
}
