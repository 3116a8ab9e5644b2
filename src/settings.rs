//! Settings Store
//!
//! Per-tab persistence of the parameter set. The real store lives outside
//! the page (extension storage); [`MemoryStore`] keeps the same key layout
//! and JSON encoding in memory.

use crate::error::TransportError;
use crate::params::{ParameterPatch, ParameterSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Browser tab identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub i32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage key for a tab's settings
pub fn settings_key(tab: TabId) -> String {
    format!("audioSettings_{}", tab)
}

/// Key-value persistence keyed by tab
///
/// A stored set may be partial (older versions, hand edits), so loads
/// return a patch to merge over defaults.
pub trait SettingsStore {
    fn load(&self, tab: TabId) -> Result<Option<ParameterPatch>, TransportError>;

    fn save(&mut self, tab: TabId, settings: &ParameterSet) -> Result<(), TransportError>;

    fn remove(&mut self, tab: TabId) -> Result<(), TransportError>;
}

/// In-memory store holding JSON-encoded sets
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail while set
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Store raw JSON under a tab's key
    pub fn insert_raw(&mut self, tab: TabId, json: impl Into<String>) {
        self.entries.insert(settings_key(tab), json.into());
    }

    pub fn contains(&self, tab: TabId) -> bool {
        self.entries.contains_key(&settings_key(tab))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.unavailable {
            return Err(TransportError::Store("storage unavailable".into()));
        }
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self, tab: TabId) -> Result<Option<ParameterPatch>, TransportError> {
        self.check()?;
        match self.entries.get(&settings_key(tab)) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, tab: TabId, settings: &ParameterSet) -> Result<(), TransportError> {
        self.check()?;
        let json = serde_json::to_string(settings)?;
        self.entries.insert(settings_key(tab), json);
        Ok(())
    }

    fn remove(&mut self, tab: TabId) -> Result<(), TransportError> {
        self.check()?;
        self.entries.remove(&settings_key(tab));
        Ok(())
    }
}
