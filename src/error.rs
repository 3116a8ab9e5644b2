//! Error types
//!
//! Failures never escape the agent. These types exist so each component can
//! use `?` internally and decide at its boundary whether to log, retry, or
//! defer.

use crate::host::ElementId;
use thiserror::Error;

/// Failures reported by the host audio engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The rendering context could not be created
    #[error("audio context unavailable: {0}")]
    Unavailable(String),

    #[error("audio context is closed")]
    Closed,

    #[error("no audio context")]
    NoContext,

    /// Source-node creation for one element failed
    #[error("cannot capture media element {element}: {reason}")]
    SourceCreation { element: ElementId, reason: String },

    #[error("unknown audio node")]
    UnknownNode,

    #[error("resume rejected: {0}")]
    Resume(String),

    /// Any other engine call failure
    #[error("audio engine call failed: {0}")]
    Call(String),
}

impl EngineError {
    /// Whether a later `ensure_created` may succeed without outside help
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            EngineError::Unavailable(_) | EngineError::Closed | EngineError::NoContext
        )
    }
}

/// Failures of the messaging transport or the settings store
#[derive(Debug, Error)]
pub enum TransportError {
    /// The receiving end (page agent, tab) does not exist
    #[error("receiving end does not exist")]
    Disconnected,

    #[error("settings store failed: {0}")]
    Store(String),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
}
