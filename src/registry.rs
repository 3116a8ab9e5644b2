//! Element Registry
//!
//! Tracks which media elements are captured into the processing graph.
//! Each element has at most one entry, and each entry owns the single
//! source node connecting that element to the graph's input tap.

use crate::error::EngineError;
use crate::graph::ProcessingGraph;
use crate::host::{AudioEngine, ElementId, MediaDocument, NodeKey};
use crate::params::ParameterSet;
use log::{debug, warn};
use std::collections::HashMap;

/// A captured media element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachedElement {
    pub element: ElementId,
    pub source: NodeKey,
    /// Graph generation the source was connected to
    pub generation: u32,
}

/// Outcome of [`ElementRegistry::attach`]
#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    /// The element already had a live entry
    AlreadyAttached,
    /// Captured; `graph_created` when this attach built the graph
    Attached { graph_created: bool },
    /// Nothing was kept; the caller should retry after a gesture
    Failed(EngineError),
}

/// Registry of captured media elements
#[derive(Debug, Default)]
pub struct ElementRegistry {
    entries: HashMap<ElementId, AttachedElement>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, element: ElementId) -> bool {
        self.entries.contains_key(&element)
    }

    pub fn get(&self, element: ElementId) -> Option<&AttachedElement> {
        self.entries.get(&element)
    }

    pub fn elements(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.entries.keys().copied()
    }

    /// Elements whose source was connected to an older graph generation
    pub fn stale(&self, generation: u32) -> Vec<ElementId> {
        let mut stale: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.generation != generation)
            .map(|entry| entry.element)
            .collect();
        stale.sort();
        stale
    }

    /// Capture an element into the graph
    ///
    /// Builds the graph on demand. An entry whose source belongs to a
    /// closed, since rebuilt context is torn down and captured again.
    pub fn attach<E: AudioEngine, D: MediaDocument>(
        &mut self,
        element: ElementId,
        graph: &mut ProcessingGraph,
        engine: &mut E,
        document: &mut D,
        params: &ParameterSet,
    ) -> AttachOutcome {
        if let Some(entry) = self.entries.get(&element) {
            if graph.is_live(engine) && entry.generation == graph.generation() {
                return AttachOutcome::AlreadyAttached;
            }
            debug!("element {} belongs to a stale graph, recapturing", element);
            self.detach(element, engine);
        }

        match self.capture(element, graph, engine, params) {
            Ok((entry, graph_created)) => {
                self.entries.insert(element, entry);
                document.watch_lifecycle(element);
                debug!("audio element processed: {}", document.describe(element));
                AttachOutcome::Attached { graph_created }
            }
            Err(e) => {
                warn!("error processing audio element {}: {}", element, e);
                AttachOutcome::Failed(e)
            }
        }
    }

    fn capture<E: AudioEngine>(
        &self,
        element: ElementId,
        graph: &mut ProcessingGraph,
        engine: &mut E,
        params: &ParameterSet,
    ) -> Result<(AttachedElement, bool), EngineError> {
        let creation = graph.ensure_created(engine, params)?;
        let graph_created = matches!(creation, crate::graph::Creation::Created(_));

        let source = engine.create_media_source(element)?;
        if let Err(e) = graph.connect_source(engine, source) {
            // Release the capture so a retry can create a fresh source
            if let Err(release) = engine.disconnect(source) {
                debug!("error releasing audio source of {}: {}", element, release);
            }
            return Err(e);
        }
        Ok((
            AttachedElement {
                element,
                source,
                generation: graph.generation(),
            },
            graph_created,
        ))
    }

    /// Release an element's source node and drop its entry
    ///
    /// Safe on elements without an entry. Returns whether an entry existed.
    pub fn detach<E: AudioEngine>(&mut self, element: ElementId, engine: &mut E) -> bool {
        let Some(entry) = self.entries.remove(&element) else {
            return false;
        };
        if let Err(e) = engine.disconnect(entry.source) {
            debug!("error disconnecting audio source of {}: {}", element, e);
        }
        true
    }

    /// Detach every element
    pub fn clear<E: AudioEngine>(&mut self, engine: &mut E) {
        let elements: Vec<_> = self.entries.keys().copied().collect();
        for element in elements {
            self.detach(element, engine);
        }
    }
}
