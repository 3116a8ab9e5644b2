//! Page Agent
//!
//! The page-resident owner of the processing graph. Host callbacks are
//! turned into [`AgentEvent`]s and queued; [`PageAgent::run_until_idle`]
//! fires due timers and then drains the queue on the calling thread. Every
//! registry mutation goes through this queue, which is what keeps
//! attach/detach for a given element strictly ordered.
//!
//! ```
//! use pageamp::agent::{AgentEvent, PageAgent};
//! use pageamp::config::AgentConfig;
//! use pageamp::sim::{SimDocument, SimEngine};
//! use std::time::Duration;
//!
//! let mut doc = SimDocument::new("https://example.com/");
//! let el = doc.add_element();
//! let mut agent = PageAgent::new(SimEngine::new(), doc, AgentConfig::default());
//! agent.dispatch(AgentEvent::Startup, Duration::ZERO);
//! assert!(agent.is_attached(el));
//! ```

use crate::config::AgentConfig;
use crate::discovery::DiscoveryWatcher;
use crate::gesture::GestureGate;
use crate::graph::ProcessingGraph;
use crate::host::{
    AudioEngine, ContextState, ElementId, GestureKind, InsertedSubtree, MediaDocument,
};
use crate::levels::{LevelSample, LevelSampler};
use crate::params::{ParameterPatch, ParameterSet};
use crate::registry::{AttachOutcome, ElementRegistry};
use log::{debug, error, info, trace};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

/// Everything the host can tell the agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Initial full-document scan
    Startup,
    /// Subtrees inserted into the document
    ElementsInserted(Vec<InsertedSubtree>),
    /// An element was explicitly removed and will not come back
    ElementRemoved(ElementId),
    /// A media element's source attribute changed
    SourceChanged(ElementId),
    MediaEnded(ElementId),
    MediaPlay(ElementId),
    MediaPause(ElementId),
    Gesture(GestureKind),
    /// The host observed the document location (after any mutation batch)
    LocationObserved(String),
    ParameterUpdate(ParameterPatch),
    /// Render-frame cadence; samples the level meters
    FrameTick,
}

/// Status reported to the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "wasm", derive(tsify::Tsify))]
#[cfg_attr(feature = "wasm", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "camelCase")]
pub struct AudioStatus {
    /// At least one element is attached
    pub has_audio: bool,
    /// A processing graph exists
    pub audio_context: bool,
}

/// Per-page audio graph manager
pub struct PageAgent<E: AudioEngine, D: MediaDocument> {
    engine: E,
    document: D,
    config: AgentConfig,
    params: ParameterSet,
    graph: ProcessingGraph,
    registry: ElementRegistry,
    discovery: DiscoveryWatcher,
    gesture: GestureGate,
    sampler: LevelSampler,
    queue: VecDeque<AgentEvent>,
    /// Elements detached by `ended` that are still in the page
    ended: BTreeSet<ElementId>,
}

impl<E: AudioEngine, D: MediaDocument> PageAgent<E, D> {
    pub fn new(engine: E, document: D, config: AgentConfig) -> Self {
        Self {
            graph: ProcessingGraph::new(config.analyser_fft_size()),
            discovery: DiscoveryWatcher::new(config.reattach_delay(), config.navigation_settle()),
            sampler: LevelSampler::new(config.sample_scale()),
            engine,
            document,
            config,
            params: ParameterSet::default(),
            registry: ElementRegistry::new(),
            gesture: GestureGate::new(),
            queue: VecDeque::new(),
            ended: BTreeSet::new(),
        }
    }

    // =========================================================================
    // Event Queue
    // =========================================================================

    /// Queue an event without processing it
    pub fn enqueue(&mut self, event: AgentEvent) {
        self.queue.push_back(event);
    }

    /// Queue an event and process everything pending
    pub fn dispatch(&mut self, event: AgentEvent, now: Duration) {
        self.enqueue(event);
        self.run_until_idle(now);
    }

    /// Fire due timers, then drain the queue
    pub fn run_until_idle(&mut self, now: Duration) {
        self.fire_due(now);
        while let Some(event) = self.queue.pop_front() {
            self.handle(event, now);
        }
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// When the host should call [`run_until_idle`](Self::run_until_idle) next
    pub fn next_deadline(&self) -> Option<Duration> {
        self.discovery.next_deadline()
    }

    fn fire_due(&mut self, now: Duration) {
        let due = self.discovery.take_due(now);
        for element in due.reattach {
            self.attach(element);
        }
        if due.rescan {
            self.scan_document();
        }
    }

    fn handle(&mut self, event: AgentEvent, now: Duration) {
        trace!("handling {:?}", event);
        match event {
            AgentEvent::Startup => {
                let href = self.document.location();
                self.discovery.set_location(href);
                self.scan_document();
            }
            AgentEvent::ElementsInserted(batch) => {
                for element in self.discovery.inserted(&batch) {
                    self.attach(element);
                }
            }
            AgentEvent::ElementRemoved(element) => {
                self.registry.detach(element, &mut self.engine);
                self.engine.release_element(element);
                self.discovery.forget(element);
                self.gesture.cancel_retry(element);
                self.ended.remove(&element);
                self.document.release(element);
            }
            AgentEvent::SourceChanged(element) => {
                self.registry.detach(element, &mut self.engine);
                self.ended.remove(&element);
                self.discovery.source_changed(element, now);
            }
            AgentEvent::MediaEnded(element) => {
                if self.registry.detach(element, &mut self.engine) {
                    self.ended.insert(element);
                }
            }
            AgentEvent::MediaPlay(element) => {
                if self.ended.remove(&element) || self.is_stale(element) {
                    self.attach(element);
                }
                self.try_resume("play");
            }
            AgentEvent::MediaPause(_) => {
                self.try_resume("pause");
            }
            AgentEvent::Gesture(kind) => {
                let release = self.gesture.on_gesture(kind);
                if release.resume {
                    self.try_resume(kind.event_type());
                }
                for element in release.retries {
                    self.attach(element);
                }
            }
            AgentEvent::LocationObserved(href) => {
                self.discovery.location_observed(&href, now);
            }
            AgentEvent::ParameterUpdate(patch) => {
                self.params.merge(&patch);
                self.graph.apply_parameters(&mut self.engine, &self.params);
            }
            AgentEvent::FrameTick => {
                self.sampler.sample(&self.engine, &self.graph);
            }
        }
    }

    // =========================================================================
    // Component Wiring
    // =========================================================================

    fn scan_document(&mut self) {
        let elements = self.document.media_elements();
        debug!("scanning document: {} media elements", elements.len());
        for element in elements {
            self.attach(element);
        }
    }

    fn attach(&mut self, element: ElementId) {
        let generation = self.graph.generation();
        let outcome = self.registry.attach(
            element,
            &mut self.graph,
            &mut self.engine,
            &mut self.document,
            &self.params,
        );
        // A fresh context may start suspended even if this attach failed
        if self.graph.generation() != generation {
            self.gesture.arm_resume();
            self.recapture_stale();
        }
        match outcome {
            AttachOutcome::Attached { .. } => {
                self.ended.remove(&element);
                self.gesture.cancel_retry(element);
            }
            AttachOutcome::AlreadyAttached => {}
            AttachOutcome::Failed(_) => {
                self.gesture.schedule_retry(element);
            }
        }
    }

    /// Move entries left on a closed context onto the rebuilt graph
    fn recapture_stale(&mut self) {
        let stale = self.registry.stale(self.graph.generation());
        if !stale.is_empty() {
            info!("recapturing {} elements after graph rebuild", stale.len());
        }
        for element in stale {
            self.attach(element);
        }
    }

    /// Attached, but not routed into a live graph
    fn is_stale(&self, element: ElementId) -> bool {
        match self.registry.get(element) {
            Some(entry) => {
                !self.graph.is_live(&self.engine) || entry.generation != self.graph.generation()
            }
            None => false,
        }
    }

    fn try_resume(&mut self, reason: &str) {
        if self.graph.nodes().is_none() || self.engine.context_state() != ContextState::Suspended {
            return;
        }
        match self.engine.resume() {
            Ok(()) => info!("audio context resumed after {}", reason),
            Err(e) => {
                error!("error resuming audio context: {}", e);
                // Next gesture gets another attempt
                self.gesture.arm_resume();
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn status(&self) -> AudioStatus {
        AudioStatus {
            has_audio: !self.registry.is_empty(),
            audio_context: self.graph.nodes().is_some(),
        }
    }

    /// Latest published levels; silence when no graph exists
    pub fn levels(&self) -> LevelSample {
        if self.graph.nodes().is_none() {
            return LevelSample::SILENT;
        }
        self.sampler.current()
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn is_attached(&self, element: ElementId) -> bool {
        self.registry.contains(element)
    }

    pub fn attached_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &ProcessingGraph {
        &self.graph
    }

    pub fn gesture(&self) -> &GestureGate {
        &self.gesture
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }
}
