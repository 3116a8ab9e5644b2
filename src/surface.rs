//! Control Surface and Tab Lifecycle
//!
//! The other side of the control interface: a surface that edits the
//! parameter set for one tab, persists it, pushes it to the page agent and
//! polls status and levels back. Transport and storage failures are logged
//! and leave the surface's in-memory settings untouched.
//!
//! [`TabLifecycle`] covers the background hooks: settings cleanup when a
//! tab closes and deciding whether a tab still needs the agent injected.

use crate::control::{Request, Response};
use crate::error::TransportError;
use crate::levels::LevelSample;
use crate::params::{ParameterPatch, ParameterSet};
use crate::settings::{SettingsStore, TabId};
use log::{error, info, trace};

/// Request/response channel to the agent of a tab
pub trait Transport {
    fn send(&mut self, tab: TabId, request: &Request) -> Result<Response, TransportError>;
}

/// Status light shown by the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIndicator {
    /// The page has attached media
    Active,
    /// The agent answered but nothing is attached
    NoAudio,
    /// The agent could not be reached
    Inactive,
}

impl StatusIndicator {
    pub fn label(self) -> &'static str {
        match self {
            StatusIndicator::Active => "Active",
            StatusIndicator::NoAudio => "No Audio",
            StatusIndicator::Inactive => "Inactive",
        }
    }
}

/// Meter heights in percent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterReading {
    pub input_percent: f32,
    pub output_percent: f32,
}

impl From<LevelSample> for MeterReading {
    fn from(sample: LevelSample) -> Self {
        Self {
            input_percent: meter_percent(sample.input_level),
            output_percent: meter_percent(sample.output_level),
        }
    }
}

/// Level in [0, 1] to a meter height in [0, 100]
pub fn meter_percent(level: f32) -> f32 {
    if level.is_nan() {
        return 0.0;
    }
    (level * 100.0).clamp(0.0, 100.0)
}

pub fn format_volume(percent: f32) -> String {
    format!("{}%", percent)
}

pub fn format_threshold(db: f32) -> String {
    format!("{} dB", db)
}

pub fn format_ratio(ratio: f32) -> String {
    format!("{}:1", ratio)
}

pub fn format_seconds(seconds: f32) -> String {
    format!("{}s", seconds)
}

/// Settings editor for one tab
pub struct ControlSurface<S: SettingsStore, T: Transport> {
    tab: TabId,
    store: S,
    transport: T,
    settings: ParameterSet,
}

impl<S: SettingsStore, T: Transport> ControlSurface<S, T> {
    pub fn new(tab: TabId, store: S, transport: T) -> Self {
        Self {
            tab,
            store,
            transport,
            settings: ParameterSet::default(),
        }
    }

    /// Merge persisted settings over the current ones
    pub fn load(&mut self) {
        match self.store.load(self.tab) {
            Ok(Some(saved)) => self.settings.merge(&saved),
            Ok(None) => {}
            Err(e) => error!("error loading settings: {}", e),
        }
    }

    pub fn settings(&self) -> &ParameterSet {
        &self.settings
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether the dynamics controls are editable
    pub fn compression_controls_enabled(&self) -> bool {
        self.settings.compression_enabled
    }

    /// Apply an edit, persist it, and push the full set to the page
    pub fn update(&mut self, patch: ParameterPatch) {
        self.settings.merge(&patch);
        self.persist();
        self.push();
    }

    pub fn reset_to_defaults(&mut self) {
        self.settings = ParameterSet::default();
        self.persist();
        self.push();
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(self.tab, &self.settings) {
            error!("error saving settings: {}", e);
        }
    }

    fn push(&mut self) {
        let request = Request::UpdateAudioSettings {
            settings: self.settings.into(),
        };
        if let Err(e) = self.transport.send(self.tab, &request) {
            error!("error sending settings to page: {}", e);
        }
    }

    pub fn check_status(&mut self) -> StatusIndicator {
        match self.transport.send(self.tab, &Request::GetAudioStatus) {
            Ok(Response::Status(status)) if status.has_audio => StatusIndicator::Active,
            Ok(_) => StatusIndicator::NoAudio,
            Err(e) => {
                trace!("status probe failed: {}", e);
                StatusIndicator::Inactive
            }
        }
    }

    /// Poll levels; any failure reads as silence
    pub fn poll_levels(&mut self) -> MeterReading {
        match self.transport.send(self.tab, &Request::GetAudioLevels) {
            Ok(Response::Levels(sample)) => sample.into(),
            Ok(_) => MeterReading::default(),
            Err(e) => {
                trace!("level poll failed: {}", e);
                MeterReading::default()
            }
        }
    }

    pub fn volume_label(&self) -> String {
        format_volume(self.settings.volume_percent)
    }

    pub fn threshold_label(&self) -> String {
        format_threshold(self.settings.threshold_db)
    }

    pub fn ratio_label(&self) -> String {
        format_ratio(self.settings.ratio)
    }

    pub fn attack_label(&self) -> String {
        format_seconds(self.settings.attack_seconds)
    }

    pub fn release_label(&self) -> String {
        format_seconds(self.settings.release_seconds)
    }
}

/// Only regular web pages get the agent
pub fn is_injectable_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Background hooks for tab lifecycle
pub struct TabLifecycle<S: SettingsStore, T: Transport> {
    store: S,
    transport: T,
}

impl<S: SettingsStore, T: Transport> TabLifecycle<S, T> {
    pub fn new(store: S, transport: T) -> Self {
        Self { store, transport }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Drop the settings of a closed tab
    pub fn on_tab_removed(&mut self, tab: TabId) {
        match self.store.remove(tab) {
            Ok(()) => info!("cleaned up settings for tab {}", tab),
            Err(e) => error!("error cleaning up tab settings: {}", e),
        }
    }

    /// Whether a loaded tab needs the agent injected
    ///
    /// Non-web pages are skipped; a tab whose agent answers a ping already
    /// has one.
    pub fn needs_injection(&mut self, tab: TabId, url: &str) -> bool {
        if !is_injectable_url(url) {
            return false;
        }
        self.transport.send(tab, &Request::Ping).is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEvent, PageAgent};
    use crate::config::AgentConfig;
    use crate::settings::MemoryStore;
    use crate::sim::{SimDocument, SimEngine};
    use approx::assert_relative_eq;
    use std::time::Duration;

    /// Transport delivering straight to an in-process agent
    struct LocalTransport {
        agent: Option<PageAgent<SimEngine, SimDocument>>,
    }

    impl LocalTransport {
        fn connected() -> Self {
            Self {
                agent: Some(PageAgent::new(
                    SimEngine::new(),
                    SimDocument::new("https://example.com/"),
                    AgentConfig::default(),
                )),
            }
        }

        fn disconnected() -> Self {
            Self { agent: None }
        }
    }

    impl Transport for LocalTransport {
        fn send(&mut self, _tab: TabId, request: &Request) -> Result<Response, TransportError> {
            let agent = self.agent.as_mut().ok_or(TransportError::Disconnected)?;
            Ok(agent.handle_request(request.clone(), Duration::ZERO))
        }
    }

    #[test]
    fn test_meter_percent() {
        assert_relative_eq!(meter_percent(0.42), 42.0, epsilon = 1e-4);
        assert_relative_eq!(meter_percent(1.7), 100.0);
        assert_relative_eq!(meter_percent(-0.1), 0.0);
        assert_relative_eq!(meter_percent(f32::NAN), 0.0);
    }

    #[test]
    fn test_labels() {
        let surface =
            ControlSurface::new(TabId(1), MemoryStore::new(), LocalTransport::connected());
        assert_eq!(surface.volume_label(), "100%");
        assert_eq!(surface.threshold_label(), "-24 dB");
        assert_eq!(surface.ratio_label(), "4:1");
        assert_eq!(surface.attack_label(), "0.05s");
        assert_eq!(surface.release_label(), "0.25s");
    }

    #[test]
    fn test_update_persists_and_pushes() {
        let mut surface =
            ControlSurface::new(TabId(7), MemoryStore::new(), LocalTransport::connected());
        surface.update(ParameterPatch::default().with_volume(150.0));

        let saved = surface.store().load(TabId(7)).unwrap().unwrap();
        assert_eq!(saved.volume_percent, Some(150.0));

        let agent = surface.transport_mut().agent.as_ref().unwrap();
        assert_relative_eq!(agent.parameters().volume_percent, 150.0);
    }

    #[test]
    fn test_load_merges_over_defaults() {
        let mut store = MemoryStore::new();
        store.insert_raw(TabId(2), r#"{"volume": 60, "compressionEnabled": true}"#);
        let mut surface = ControlSurface::new(TabId(2), store, LocalTransport::connected());
        surface.load();

        assert_relative_eq!(surface.settings().volume_percent, 60.0);
        assert!(surface.compression_controls_enabled());
        assert_relative_eq!(surface.settings().ratio, 4.0);
    }

    #[test]
    fn test_failures_keep_in_memory_state() {
        let mut store = MemoryStore::new();
        store.set_unavailable(true);
        let mut surface = ControlSurface::new(TabId(2), store, LocalTransport::disconnected());
        surface.load();
        surface.update(ParameterPatch::default().with_ratio(10.0));

        assert_relative_eq!(surface.settings().ratio, 10.0);
        assert_eq!(surface.check_status(), StatusIndicator::Inactive);
        assert_eq!(surface.poll_levels(), MeterReading::default());
    }

    #[test]
    fn test_reset_to_defaults() {
        let mut surface =
            ControlSurface::new(TabId(1), MemoryStore::new(), LocalTransport::connected());
        surface.update(ParameterPatch::default().with_volume(30.0).with_compression(true));
        surface.reset_to_defaults();
        assert_eq!(*surface.settings(), ParameterSet::default());

        let agent = surface.transport_mut().agent.as_ref().unwrap();
        assert_eq!(*agent.parameters(), ParameterSet::default());
    }

    #[test]
    fn test_status_indicator() {
        let mut surface =
            ControlSurface::new(TabId(1), MemoryStore::new(), LocalTransport::connected());
        assert_eq!(surface.check_status(), StatusIndicator::NoAudio);

        let agent = surface.transport_mut().agent.as_mut().unwrap();
        agent.document_mut().add_element();
        agent.dispatch(AgentEvent::Startup, Duration::ZERO);
        assert_eq!(surface.check_status(), StatusIndicator::Active);
        assert_eq!(StatusIndicator::Active.label(), "Active");
    }

    #[test]
    fn test_tab_lifecycle() {
        let mut store = MemoryStore::new();
        store.save(TabId(4), &ParameterSet::default()).unwrap();
        let mut lifecycle = TabLifecycle::new(store, LocalTransport::disconnected());

        assert!(lifecycle.needs_injection(TabId(4), "https://example.com/"));
        assert!(!lifecycle.needs_injection(TabId(4), "chrome://extensions"));
        assert!(!lifecycle.needs_injection(TabId(4), "file:///tmp/a.html"));

        lifecycle.on_tab_removed(TabId(4));
        assert!(!lifecycle.store().contains(TabId(4)));
    }

    #[test]
    fn test_injected_tab_answers_ping() {
        let mut lifecycle = TabLifecycle::new(MemoryStore::new(), LocalTransport::connected());
        assert!(!lifecycle.needs_injection(TabId(1), "http://example.com/"));
    }
}
