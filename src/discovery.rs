//! Discovery Watcher
//!
//! Keeps "media elements in the document" and "entries in the registry"
//! eventually consistent. The watcher itself never touches the registry: it
//! turns observations into attach/detach decisions and owns the delayed
//! work (source-change re-attaches, post-navigation rescans).
//!
//! Structural removal never detaches. A removal notification cannot tell a
//! relocated element from a discarded one, so only `ended` or an explicit
//! removal signal releases an entry.

use crate::host::{ElementId, InsertedSubtree};
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Work that became due
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DueWork {
    /// Elements whose source change has settled
    pub reattach: Vec<ElementId>,
    /// A post-navigation full rescan is due
    pub rescan: bool,
}

impl DueWork {
    pub fn is_empty(&self) -> bool {
        self.reattach.is_empty() && !self.rescan
    }
}

/// Observation state for one document
#[derive(Debug)]
pub struct DiscoveryWatcher {
    reattach_delay: Duration,
    settle_delay: Duration,
    last_location: Option<String>,
    pending_reattach: BTreeMap<ElementId, Duration>,
    pending_rescan: Option<Duration>,
}

impl DiscoveryWatcher {
    pub fn new(reattach_delay: Duration, settle_delay: Duration) -> Self {
        Self {
            reattach_delay,
            settle_delay,
            last_location: None,
            pending_reattach: BTreeMap::new(),
            pending_rescan: None,
        }
    }

    /// Remember the location seen by the initial scan
    pub fn set_location(&mut self, href: impl Into<String>) {
        self.last_location = Some(href.into());
    }

    /// Elements to attach for a batch of inserted subtrees
    ///
    /// Each qualifying element appears once, in first-seen order.
    pub fn inserted(&self, batch: &[InsertedSubtree]) -> Vec<ElementId> {
        let mut seen = HashSet::new();
        batch
            .iter()
            .flat_map(|subtree| subtree.iter())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Record a source change; the caller detaches immediately
    ///
    /// Re-attachment is scheduled `reattach_delay` after the latest change,
    /// so a burst of changes yields one re-attach.
    pub fn source_changed(&mut self, element: ElementId, now: Duration) {
        let due = now + self.reattach_delay;
        if self.pending_reattach.insert(element, due).is_some() {
            debug!("coalescing source change for {}", element);
        }
    }

    /// Whether a re-attach is pending for an element
    pub fn reattach_pending(&self, element: ElementId) -> bool {
        self.pending_reattach.contains_key(&element)
    }

    /// Drop pending work for an element that left for good
    pub fn forget(&mut self, element: ElementId) {
        self.pending_reattach.remove(&element);
    }

    /// Record the current location; schedules a rescan when it changed
    pub fn location_observed(&mut self, href: &str, now: Duration) -> bool {
        if self.last_location.as_deref() == Some(href) {
            return false;
        }
        debug!("location changed to {}, rescanning after settle", href);
        self.last_location = Some(href.to_string());
        self.pending_rescan = Some(now + self.settle_delay);
        true
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Duration> {
        let reattach = self.pending_reattach.values().min().copied();
        match (reattach, self.pending_rescan) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Take every piece of work due at `now`
    pub fn take_due(&mut self, now: Duration) -> DueWork {
        let reattach: Vec<ElementId> = self
            .pending_reattach
            .iter()
            .filter(|&(_, &due)| due <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in &reattach {
            self.pending_reattach.remove(id);
        }

        let rescan = matches!(self.pending_rescan, Some(due) if due <= now);
        if rescan {
            self.pending_rescan = None;
        }
        DueWork { reattach, rescan }
    }
}
