//! Gesture-Gated Activator
//!
//! Host audio engines may keep a context suspended, or refuse to create one,
//! until the user interacts with the page. This module holds the deferred
//! work that a gesture releases:
//!
//! - a one-shot resume request, armed when a graph is created
//! - a retry set of elements whose attachment failed, keyed by element
//!
//! Each gesture drains both exactly once. Nothing here retries on its own;
//! a failed resume only re-arms the one-shot for the next gesture.

use crate::host::{ElementId, GestureKind};
use log::debug;
use std::collections::BTreeSet;

/// What a gesture released
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GestureRelease {
    /// Resume the context if it is suspended
    pub resume: bool,
    /// Elements to attach again
    pub retries: Vec<ElementId>,
}

/// Pending gesture-gated work
#[derive(Debug, Default)]
pub struct GestureGate {
    resume_armed: bool,
    pending_retries: BTreeSet<ElementId>,
    gestures_seen: u64,
}

impl GestureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the one-shot resume; arming twice still fires once
    pub fn arm_resume(&mut self) {
        self.resume_armed = true;
    }

    pub fn resume_armed(&self) -> bool {
        self.resume_armed
    }

    /// Queue an element for a retry on the next gesture
    ///
    /// Returns false when a retry for it was already pending.
    pub fn schedule_retry(&mut self, element: ElementId) -> bool {
        let queued = self.pending_retries.insert(element);
        if queued {
            debug!("retrying {} after the next user interaction", element);
        }
        queued
    }

    /// Drop a pending retry (the element left the page)
    pub fn cancel_retry(&mut self, element: ElementId) {
        self.pending_retries.remove(&element);
    }

    pub fn retry_pending(&self, element: ElementId) -> bool {
        self.pending_retries.contains(&element)
    }

    pub fn pending_retries(&self) -> usize {
        self.pending_retries.len()
    }

    /// Whether any gesture listener has work to do
    pub fn is_waiting(&self) -> bool {
        self.resume_armed || !self.pending_retries.is_empty()
    }

    pub fn gestures_seen(&self) -> u64 {
        self.gestures_seen
    }

    /// Consume a gesture, releasing everything pending
    pub fn on_gesture(&mut self, kind: GestureKind) -> GestureRelease {
        self.gestures_seen += 1;
        let release = GestureRelease {
            resume: core::mem::take(&mut self.resume_armed),
            retries: core::mem::take(&mut self.pending_retries)
                .into_iter()
                .collect(),
        };
        if release.resume || !release.retries.is_empty() {
            debug!(
                "{} released resume={} retries={}",
                kind.event_type(),
                release.resume,
                release.retries.len()
            );
        }
        release
    }
}
