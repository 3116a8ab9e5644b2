//! # PageAmp: Per-Page Audio Amplifier & Compressor
//!
//! `pageamp` routes every audio/video element of a web page through one
//! shared processing graph so a listener can boost volume past 100% and
//! tame peaks with a dynamics compressor.
//!
//! ## Architecture
//!
//! The library is organized in three layers:
//!
//! - **Layer 1: Host Traits** - [`AudioEngine`] and [`MediaDocument`] describe
//!   what the page offers
//! - **Layer 2: Components** - graph lifecycle, element registry, discovery
//!   timers, gesture gate, level sampler
//! - **Layer 3: Page Agent** - single-threaded event queue wiring the
//!   components to host callbacks
//!
//! Around the agent sit the control interface (JSON request/response), the
//! per-tab settings store and the control surface that drives them.
//!
//! ## Signal Flow
//!
//! ```text
//! element source ─┬─> input tap
//!                 └─> compressor ─> gain ─┬─> destination
//!                                         └─> output tap
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use pageamp::prelude::*;
//! use std::time::Duration;
//!
//! let mut doc = SimDocument::new("https://example.com/");
//! let video = doc.add_element();
//!
//! let mut agent = PageAgent::new(SimEngine::new(), doc, AgentConfig::default());
//! agent.dispatch(AgentEvent::Startup, Duration::ZERO);
//! agent.dispatch(
//!     AgentEvent::ParameterUpdate(ParameterPatch::default().with_volume(150.0)),
//!     Duration::from_millis(10),
//! );
//!
//! assert!(agent.is_attached(video));
//! assert!(agent.status().has_audio);
//! ```

pub mod agent;
pub mod config;
pub mod control;
pub mod discovery;
pub mod error;
pub mod gesture;
pub mod graph;
pub mod host;
pub mod levels;
pub mod params;
pub mod registry;
pub mod settings;
pub mod sim;
pub mod surface;

#[cfg(feature = "wasm")]
pub mod wasm;

/// Prelude module for convenient imports
pub mod prelude {
    // Layer 1: Host Traits
    pub use crate::host::{
        AudioEngine, ContextState, ElementId, GestureKind, InsertedSubtree, MediaDocument,
        NodeKey, ParamKind, StageKind,
    };

    // Layer 2: Components
    pub use crate::discovery::{DiscoveryWatcher, DueWork};
    pub use crate::gesture::{GestureGate, GestureRelease};
    pub use crate::graph::{Creation, GraphNodes, ProcessingGraph};
    pub use crate::levels::{level_db, normalized_rms, LevelSample, LevelSampler};
    pub use crate::registry::{AttachOutcome, AttachedElement, ElementRegistry};

    // Layer 3: Page Agent
    pub use crate::agent::{AgentEvent, AudioStatus, PageAgent};
    pub use crate::config::AgentConfig;
    pub use crate::params::{DynamicsValues, ParameterPatch, ParameterSet};

    // Control Interface
    pub use crate::control::{Request, Response, UNKNOWN_ACTION};
    pub use crate::settings::{settings_key, MemoryStore, SettingsStore, TabId};
    pub use crate::surface::{
        is_injectable_url, meter_percent, ControlSurface, MeterReading, StatusIndicator,
        TabLifecycle, Transport,
    };

    // Errors
    pub use crate::error::{EngineError, TransportError};

    // In-memory host
    pub use crate::sim::{SimDocument, SimEngine, SimNodeKind, SimOp};
}

// Re-export key types at crate root for convenience
pub use prelude::*;
