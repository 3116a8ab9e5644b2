//! WASM bindings for PageAmp
//!
//! Browser host for the page agent: a Web Audio engine, a live-document
//! adapter, the observer and timer plumbing that feeds the event queue, and
//! the JavaScript-facing agent handle.

mod agent;
mod document;
mod engine;
mod error;
mod logger;
mod runtime;

pub use agent::PageAmpAgent;
pub use document::{ElementTable, WebDocument, MEDIA_SELECTOR};
pub use engine::WebEngine;
pub use error::PageAmpError;

// Re-export wasm_bindgen for convenience
pub use wasm_bindgen::prelude::*;
