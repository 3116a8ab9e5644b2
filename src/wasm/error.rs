//! Error types for WASM bindings

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Error type for WASM bindings
#[wasm_bindgen]
pub struct PageAmpError {
    message: String,
}

#[wasm_bindgen]
impl PageAmpError {
    /// Get the error message
    #[wasm_bindgen(getter)]
    pub fn message(&self) -> String {
        self.message.clone()
    }
}

impl From<serde_wasm_bindgen::Error> for PageAmpError {
    fn from(e: serde_wasm_bindgen::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

impl From<&str> for PageAmpError {
    fn from(message: &str) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl PageAmpError {
    /// Convert to JsValue for use as error return
    pub fn into_js(self) -> JsValue {
        JsValue::from_str(&self.message)
    }
}

/// Best-effort text for a thrown JS value
pub(crate) fn describe_js(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return format!("{}: {}", String::from(err.name()), String::from(err.message()));
    }
    format!("{:?}", value)
}
