//! In-Memory Host
//!
//! [`SimEngine`] and [`SimDocument`] implement the host traits without a
//! browser. They model the behaviors the agent has to cope with: contexts
//! that fail to start or start suspended, media elements that refuse to be
//! captured twice, and analysis taps whose magnitude data can be set
//! directly. No audio is rendered.

use crate::error::EngineError;
use crate::host::{
    AudioEngine, ContextState, ElementId, MediaDocument, NodeKey, ParamKind, StageKind,
};
use slotmap::SlotMap;
use std::collections::{BTreeSet, HashMap};

/// Kind of a simulated node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimNodeKind {
    Stage(StageKind),
    Source(ElementId),
}

/// Engine calls that matter for attachment ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    CreateContext,
    CreateSource(ElementId),
    ConnectSource(ElementId),
    DisconnectSource(ElementId),
    Resume,
}

#[derive(Debug)]
struct SimNode {
    kind: SimNodeKind,
    outputs: Vec<NodeKey>,
    to_destination: bool,
    fft_size: u32,
    magnitudes: Vec<u8>,
    /// Latest scheduled (time, value) per control
    params: HashMap<ParamKind, (f64, f32)>,
    /// Sources stay captured until disconnected
    captured: bool,
}

impl SimNode {
    fn new(kind: SimNodeKind) -> Self {
        Self {
            kind,
            outputs: Vec::new(),
            to_destination: false,
            fft_size: 2048,
            magnitudes: Vec::new(),
            params: HashMap::new(),
            captured: matches!(kind, SimNodeKind::Source(_)),
        }
    }
}

/// Simulated audio engine
#[derive(Debug)]
pub struct SimEngine {
    state: ContextState,
    nodes: SlotMap<NodeKey, SimNode>,
    current_time: f64,
    contexts_created: usize,
    failing_contexts: usize,
    autoplay_blocked: bool,
    resume_fails: bool,
    resume_requests: usize,
    refused_elements: BTreeSet<ElementId>,
    failing_disconnects: bool,
    released: Vec<ElementId>,
    history: Vec<SimOp>,
}

impl SimEngine {
    /// Engine whose contexts start running
    pub fn new() -> Self {
        Self {
            state: ContextState::Absent,
            nodes: SlotMap::with_key(),
            current_time: 0.0,
            contexts_created: 0,
            failing_contexts: 0,
            autoplay_blocked: false,
            resume_fails: false,
            resume_requests: 0,
            refused_elements: BTreeSet::new(),
            failing_disconnects: false,
            released: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Engine whose contexts start suspended until resumed
    pub fn with_autoplay_blocked() -> Self {
        Self {
            autoplay_blocked: true,
            ..Self::new()
        }
    }

    /// Reject the next `count` context creations
    pub fn fail_next_contexts(&mut self, count: usize) {
        self.failing_contexts = count;
    }

    /// Make `resume` fail while set
    pub fn set_resume_fails(&mut self, fails: bool) {
        self.resume_fails = fails;
    }

    /// Refuse to capture an element until allowed again
    pub fn refuse_element(&mut self, element: ElementId) {
        self.refused_elements.insert(element);
    }

    pub fn allow_element(&mut self, element: ElementId) {
        self.refused_elements.remove(&element);
    }

    /// Make every `disconnect` report an error (the node is still released)
    pub fn set_disconnect_fails(&mut self, fails: bool) {
        self.failing_disconnects = fails;
    }

    pub fn set_current_time(&mut self, seconds: f64) {
        self.current_time = seconds;
    }

    /// Close the context (terminal)
    pub fn close(&mut self) {
        if self.state != ContextState::Absent {
            self.state = ContextState::Closed;
        }
    }

    /// Set the magnitudes an analyser reports
    pub fn set_magnitudes(&mut self, node: NodeKey, magnitudes: Vec<u8>) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.magnitudes = magnitudes;
        }
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created
    }

    pub fn resume_requests(&self) -> usize {
        self.resume_requests
    }

    pub fn history(&self) -> &[SimOp] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Nodes a node feeds into
    pub fn outputs(&self, node: NodeKey) -> Vec<NodeKey> {
        self.nodes
            .get(node)
            .map(|n| n.outputs.clone())
            .unwrap_or_default()
    }

    pub fn reaches_destination(&self, node: NodeKey) -> bool {
        self.nodes.get(node).is_some_and(|n| n.to_destination)
    }

    pub fn node_kind(&self, node: NodeKey) -> Option<SimNodeKind> {
        self.nodes.get(node).map(|n| n.kind)
    }

    /// Latest scheduled value of a control
    pub fn param(&self, node: NodeKey, param: ParamKind) -> Option<f32> {
        self.nodes.get(node)?.params.get(&param).map(|&(_, v)| v)
    }

    /// Time the latest value of a control was scheduled for
    pub fn param_time(&self, node: NodeKey, param: ParamKind) -> Option<f64> {
        self.nodes.get(node)?.params.get(&param).map(|&(t, _)| t)
    }

    /// Captured source nodes for an element
    pub fn live_sources(&self, element: ElementId) -> usize {
        self.nodes
            .values()
            .filter(|n| n.captured && n.kind == SimNodeKind::Source(element))
            .count()
    }

    /// Source nodes held for an element, captured or not
    pub fn source_nodes(&self, element: ElementId) -> usize {
        self.nodes
            .values()
            .filter(|n| n.kind == SimNodeKind::Source(element))
            .count()
    }

    /// Elements passed to `release_element`, in call order
    pub fn released_elements(&self) -> &[ElementId] {
        &self.released
    }

    /// Source nodes currently feeding a given node
    pub fn sources_feeding(&self, node: NodeKey) -> usize {
        self.nodes
            .values()
            .filter(|n| matches!(n.kind, SimNodeKind::Source(_)) && n.outputs.contains(&node))
            .count()
    }

    fn live_context(&self) -> Result<(), EngineError> {
        match self.state {
            ContextState::Absent => Err(EngineError::NoContext),
            ContextState::Closed => Err(EngineError::Closed),
            ContextState::Suspended | ContextState::Running => Ok(()),
        }
    }

    fn node_mut(&mut self, node: NodeKey) -> Result<&mut SimNode, EngineError> {
        self.nodes.get_mut(node).ok_or(EngineError::UnknownNode)
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for SimEngine {
    fn create_context(&mut self) -> Result<(), EngineError> {
        if self.failing_contexts > 0 {
            self.failing_contexts -= 1;
            return Err(EngineError::Unavailable("NotAllowedError".into()));
        }
        self.nodes.clear();
        self.state = if self.autoplay_blocked {
            ContextState::Suspended
        } else {
            ContextState::Running
        };
        self.contexts_created += 1;
        self.history.push(SimOp::CreateContext);
        Ok(())
    }

    fn context_state(&self) -> ContextState {
        self.state
    }

    fn current_time(&self) -> f64 {
        self.current_time
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        self.live_context()?;
        self.resume_requests += 1;
        self.history.push(SimOp::Resume);
        if self.resume_fails {
            return Err(EngineError::Resume("NotAllowedError".into()));
        }
        self.state = ContextState::Running;
        Ok(())
    }

    fn create_stage(&mut self, kind: StageKind) -> Result<NodeKey, EngineError> {
        self.live_context()?;
        Ok(self.nodes.insert(SimNode::new(SimNodeKind::Stage(kind))))
    }

    fn set_fft_size(&mut self, node: NodeKey, size: u32) -> Result<(), EngineError> {
        let n = self.node_mut(node)?;
        if n.kind != SimNodeKind::Stage(StageKind::Analyser) {
            return Err(EngineError::Call("not an analyser".into()));
        }
        n.fft_size = size;
        Ok(())
    }

    fn connect(&mut self, from: NodeKey, to: NodeKey) -> Result<(), EngineError> {
        self.live_context()?;
        if !self.nodes.contains_key(to) {
            return Err(EngineError::UnknownNode);
        }
        let n = self.node_mut(from)?;
        if !n.outputs.contains(&to) {
            n.outputs.push(to);
        }
        if let SimNodeKind::Source(element) = n.kind {
            self.history.push(SimOp::ConnectSource(element));
        }
        Ok(())
    }

    fn connect_to_destination(&mut self, from: NodeKey) -> Result<(), EngineError> {
        self.live_context()?;
        self.node_mut(from)?.to_destination = true;
        Ok(())
    }

    fn disconnect(&mut self, node: NodeKey) -> Result<(), EngineError> {
        let failing = self.failing_disconnects;
        let n = self.node_mut(node)?;
        n.outputs.clear();
        n.to_destination = false;
        n.captured = false;
        if let SimNodeKind::Source(element) = n.kind {
            self.history.push(SimOp::DisconnectSource(element));
        }
        if failing {
            return Err(EngineError::Call("InvalidAccessError".into()));
        }
        Ok(())
    }

    fn set_param_at_time(
        &mut self,
        node: NodeKey,
        param: ParamKind,
        value: f32,
        at: f64,
    ) -> Result<(), EngineError> {
        self.live_context()?;
        self.node_mut(node)?.params.insert(param, (at, value));
        Ok(())
    }

    fn create_media_source(&mut self, element: ElementId) -> Result<NodeKey, EngineError> {
        self.live_context()?;
        if self.refused_elements.contains(&element) {
            return Err(EngineError::SourceCreation {
                element,
                reason: "SecurityError".into(),
            });
        }
        if self.live_sources(element) > 0 {
            return Err(EngineError::SourceCreation {
                element,
                reason: "InvalidStateError: element already connected".into(),
            });
        }
        self.history.push(SimOp::CreateSource(element));
        Ok(self.nodes.insert(SimNode::new(SimNodeKind::Source(element))))
    }

    fn release_element(&mut self, element: ElementId) {
        self.released.push(element);
        self.nodes.retain(|_, n| n.captured || n.kind != SimNodeKind::Source(element));
    }

    fn frequency_bin_count(&self, node: NodeKey) -> usize {
        self.nodes
            .get(node)
            .map(|n| (n.fft_size / 2) as usize)
            .unwrap_or(0)
    }

    fn byte_frequency_data(&self, node: NodeKey, out: &mut [u8]) {
        let Some(n) = self.nodes.get(node) else {
            return;
        };
        let len = out.len().min((n.fft_size / 2) as usize);
        for (i, slot) in out[..len].iter_mut().enumerate() {
            *slot = n.magnitudes.get(i).copied().unwrap_or(0);
        }
    }
}

/// Simulated live document
#[derive(Debug, Clone)]
pub struct SimDocument {
    present: Vec<ElementId>,
    href: String,
    watched: BTreeSet<ElementId>,
    next_id: u64,
}

impl SimDocument {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            present: Vec::new(),
            href: href.into(),
            watched: BTreeSet::new(),
            next_id: 1,
        }
    }

    /// Create a media element and insert it into the document
    pub fn add_element(&mut self) -> ElementId {
        let id = self.create_element();
        self.present.push(id);
        id
    }

    /// Create a media element without inserting it
    pub fn create_element(&mut self) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, element: ElementId) {
        if !self.present.contains(&element) {
            self.present.push(element);
        }
    }

    /// Take an element out of the document (the object stays alive)
    pub fn remove(&mut self, element: ElementId) {
        self.present.retain(|&e| e != element);
    }

    /// Client-side navigation: new location, content swapped
    pub fn navigate(&mut self, href: impl Into<String>) {
        self.href = href.into();
    }

    pub fn is_watched(&self, element: ElementId) -> bool {
        self.watched.contains(&element)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }
}

impl MediaDocument for SimDocument {
    fn media_elements(&mut self) -> Vec<ElementId> {
        self.present.clone()
    }

    fn location(&self) -> String {
        self.href.clone()
    }

    fn watch_lifecycle(&mut self, element: ElementId) {
        self.watched.insert(element);
    }

    fn release(&mut self, element: ElementId) {
        self.watched.remove(&element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_lifecycle() {
        let mut engine = SimEngine::with_autoplay_blocked();
        assert_eq!(engine.context_state(), ContextState::Absent);
        engine.create_context().unwrap();
        assert_eq!(engine.context_state(), ContextState::Suspended);
        engine.resume().unwrap();
        assert_eq!(engine.context_state(), ContextState::Running);
        engine.close();
        assert_eq!(engine.context_state(), ContextState::Closed);
        assert_eq!(engine.resume(), Err(EngineError::Closed));
    }

    #[test]
    fn test_element_captured_once() {
        let mut engine = SimEngine::new();
        engine.create_context().unwrap();
        let el = ElementId(1);
        let source = engine.create_media_source(el).unwrap();
        assert!(engine.create_media_source(el).is_err());

        engine.disconnect(source).unwrap();
        assert_eq!(engine.live_sources(el), 0);
        assert!(engine.create_media_source(el).is_ok());
    }

    #[test]
    fn test_release_drops_disconnected_sources() {
        let mut engine = SimEngine::new();
        engine.create_context().unwrap();
        let el = ElementId(1);
        let source = engine.create_media_source(el).unwrap();

        engine.release_element(el);
        assert_eq!(engine.source_nodes(el), 1);

        engine.disconnect(source).unwrap();
        engine.release_element(el);
        assert_eq!(engine.source_nodes(el), 0);
        assert_eq!(engine.released_elements(), &[el, el]);
    }

    #[test]
    fn test_new_context_invalidates_nodes() {
        let mut engine = SimEngine::new();
        engine.create_context().unwrap();
        let gain = engine.create_stage(StageKind::Gain).unwrap();
        engine.create_context().unwrap();
        assert_eq!(engine.node_kind(gain), None);
    }

    #[test]
    fn test_byte_frequency_data_bounded_by_bins() {
        let mut engine = SimEngine::new();
        engine.create_context().unwrap();
        let tap = engine.create_stage(StageKind::Analyser).unwrap();
        engine.set_fft_size(tap, 8).unwrap();
        engine.set_magnitudes(tap, vec![9, 8, 7]);

        let mut out = [1u8; 6];
        engine.byte_frequency_data(tap, &mut out);
        assert_eq!(out, [9, 8, 7, 0, 1, 1]);
    }

    #[test]
    fn test_document_membership() {
        let mut doc = SimDocument::new("https://example.com/");
        let a = doc.add_element();
        let b = doc.create_element();
        assert_eq!(doc.media_elements(), vec![a]);
        doc.insert(b);
        doc.remove(a);
        assert_eq!(doc.media_elements(), vec![b]);
    }
}
