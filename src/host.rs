//! Host Collaborators
//!
//! The agent never touches a browser directly. Everything it needs from the
//! page is expressed through two traits:
//!
//! - [`AudioEngine`] - the audio rendering context and its nodes
//! - [`MediaDocument`] - the live document the media elements live in
//!
//! The browser implementation lives in `crate::wasm`; an in-memory
//! implementation for tests and benchmarks lives in [`crate::sim`].

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

slotmap::new_key_type! {
    /// Handle to an audio node owned by an [`AudioEngine`]
    pub struct NodeKey;
}

/// Identity of a media element in the live document
///
/// Hosts hand these out; two ids are equal exactly when they refer to the
/// same element object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of the rendering context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No context has been created yet
    Absent,
    /// Created but not producing sound (autoplay policy)
    Suspended,
    Running,
    /// Terminal; a new context must be created
    Closed,
}

/// Processing stages the graph is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Gain,
    Compressor,
    Analyser,
}

/// Automatable stage controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Gain,
    Threshold,
    Ratio,
    Attack,
    Release,
}

/// Audio rendering engine of the page
///
/// A host owns at most one rendering context at a time. `create_context`
/// replaces a closed one; every node handle from a previous context becomes
/// invalid when a new context is created.
pub trait AudioEngine {
    /// Create the rendering context
    fn create_context(&mut self) -> Result<(), EngineError>;

    fn context_state(&self) -> ContextState;

    /// Current rendering time in seconds
    fn current_time(&self) -> f64;

    /// Ask a suspended context to resume
    ///
    /// Hosts with asynchronous resumption return `Ok` once the request is
    /// issued and log a later rejection themselves.
    fn resume(&mut self) -> Result<(), EngineError>;

    fn create_stage(&mut self, kind: StageKind) -> Result<NodeKey, EngineError>;

    /// Set the FFT size of an analyser stage
    fn set_fft_size(&mut self, node: NodeKey, size: u32) -> Result<(), EngineError>;

    fn connect(&mut self, from: NodeKey, to: NodeKey) -> Result<(), EngineError>;

    fn connect_to_destination(&mut self, from: NodeKey) -> Result<(), EngineError>;

    /// Disconnect every outgoing connection of a node
    fn disconnect(&mut self, node: NodeKey) -> Result<(), EngineError>;

    /// Schedule a control value to take effect at `at` seconds
    fn set_param_at_time(
        &mut self,
        node: NodeKey,
        param: ParamKind,
        value: f32,
        at: f64,
    ) -> Result<(), EngineError>;

    /// Derive a source node capturing a media element's output
    fn create_media_source(&mut self, element: ElementId) -> Result<NodeKey, EngineError>;

    /// Drop whatever the engine still holds for an element that left the page
    ///
    /// Called after the element's source was disconnected.
    fn release_element(&mut self, _element: ElementId) {}

    /// Number of magnitude bins an analyser produces
    fn frequency_bin_count(&self, node: NodeKey) -> usize;

    /// Copy the analyser's current byte magnitudes into `out`
    ///
    /// Copies `min(out.len(), frequency_bin_count)` values.
    fn byte_frequency_data(&self, node: NodeKey, out: &mut [u8]);
}

/// The live document hosting media elements
pub trait MediaDocument {
    /// Every qualifying media element currently in the document
    fn media_elements(&mut self) -> Vec<ElementId>;

    /// Current document location
    fn location(&self) -> String;

    /// Start forwarding `ended`/`play`/`pause` for an element
    ///
    /// Must be idempotent: watching twice yields one set of listeners.
    fn watch_lifecycle(&mut self, element: ElementId);

    /// Stop forwarding lifecycle events and forget the element
    fn release(&mut self, element: ElementId);

    /// Short human-readable description for logs
    fn describe(&self, element: ElementId) -> String {
        element.to_string()
    }
}

/// A subtree inserted into the document, reduced to its media elements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertedSubtree {
    /// The inserted node itself, when it qualifies
    pub root: Option<ElementId>,
    /// Qualifying descendants of the inserted node
    pub descendants: Vec<ElementId>,
}

impl InsertedSubtree {
    pub fn element(id: ElementId) -> Self {
        Self {
            root: Some(id),
            descendants: Vec::new(),
        }
    }

    pub fn container(descendants: Vec<ElementId>) -> Self {
        Self {
            root: None,
            descendants,
        }
    }

    /// Root first, then descendants in document order
    pub fn iter(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.root.into_iter().chain(self.descendants.iter().copied())
    }
}

/// Gesture kinds the host audio engine treats as user activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureKind {
    PointerDown,
    KeyDown,
    TouchStart,
}

impl GestureKind {
    pub const ALL: [GestureKind; 3] = [
        GestureKind::PointerDown,
        GestureKind::KeyDown,
        GestureKind::TouchStart,
    ];

    /// DOM event type name
    pub fn event_type(self) -> &'static str {
        match self {
            GestureKind::PointerDown => "pointerdown",
            GestureKind::KeyDown => "keydown",
            GestureKind::TouchStart => "touchstart",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_subtree_order() {
        let subtree = InsertedSubtree {
            root: Some(ElementId(1)),
            descendants: vec![ElementId(2), ElementId(3)],
        };
        let ids: Vec<_> = subtree.iter().collect();
        assert_eq!(ids, vec![ElementId(1), ElementId(2), ElementId(3)]);

        let container = InsertedSubtree::container(vec![ElementId(7)]);
        assert_eq!(container.iter().count(), 1);
    }

    #[test]
    fn test_gesture_event_types() {
        let names: Vec<_> = GestureKind::ALL.iter().map(|g| g.event_type()).collect();
        assert_eq!(names, vec!["pointerdown", "keydown", "touchstart"]);
    }
}
