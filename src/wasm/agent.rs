//! PageAmpAgent - JavaScript handle to the page agent

use super::error::PageAmpError;
use super::logger;
use super::runtime::Runtime;
use crate::agent::AudioStatus;
use crate::config::AgentConfig;
use crate::levels::LevelSample;
use crate::params::ParameterSet;
use log::LevelFilter;
use serde::Serialize;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

/// Page agent running inside a content script
///
/// Construction installs every observer and listener; dropping the handle
/// (`free()` on the JS side) removes them again.
#[wasm_bindgen]
pub struct PageAmpAgent {
    runtime: Rc<Runtime>,
}

#[wasm_bindgen]
impl PageAmpAgent {
    /// Start the agent on the current document
    ///
    /// `config` is an optional `AgentConfig` object; missing fields use
    /// their defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<PageAmpAgent, JsValue> {
        // Initialize panic hook for better error messages
        console_error_panic_hook::set_once();
        logger::init(LevelFilter::Info);

        let config: AgentConfig = if config.is_undefined() || config.is_null() {
            AgentConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config).map_err(|e| PageAmpError::from(e).into_js())?
        };

        Ok(Self {
            runtime: Runtime::start(config)?,
        })
    }

    /// Answer a control message (`{action, ...}`) with its JSON reply
    pub fn handle_message(&self, message: JsValue) -> Result<JsValue, JsValue> {
        let message: serde_json::Value = serde_wasm_bindgen::from_value(message)
            .map_err(|e| PageAmpError::from(e).into_js())?;
        let reply = self.runtime.handle_message(&message);
        reply
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| PageAmpError::from(e).into_js())
    }

    pub fn status(&self) -> Result<AudioStatus, JsValue> {
        self.runtime
            .with_agent(|agent| agent.status())
            .ok_or_else(|| PageAmpError::from("agent busy").into_js())
    }

    pub fn levels(&self) -> Result<LevelSample, JsValue> {
        self.runtime
            .with_agent(|agent| agent.levels())
            .ok_or_else(|| PageAmpError::from("agent busy").into_js())
    }

    /// Current effective parameters
    pub fn parameters(&self) -> Result<ParameterSet, JsValue> {
        self.runtime
            .with_agent(|agent| *agent.parameters())
            .ok_or_else(|| PageAmpError::from("agent busy").into_js())
    }

    /// Raise or lower console verbosity (`"error"` .. `"trace"`)
    pub fn set_log_level(&self, level: &str) -> Result<(), JsValue> {
        let filter: LevelFilter = level
            .parse()
            .map_err(|_| PageAmpError::from("unknown log level").into_js())?;
        logger::init(filter);
        Ok(())
    }
}
