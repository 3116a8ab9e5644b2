//! Control Interface
//!
//! Request/response contract between a control surface and the page agent.
//! Messages are JSON objects carrying an `action` field:
//!
//! | Action | Response |
//! |--------|----------|
//! | `updateAudioSettings` | `{"success": true}` |
//! | `getAudioStatus` | `{"hasAudio": bool, "audioContext": bool}` |
//! | `getAudioLevels` | `{"inputLevel": f32, "outputLevel": f32}` |
//! | `ping` | `{"success": true}` |
//! | anything else | `{"error": "Unknown action"}` |

use crate::agent::{AgentEvent, AudioStatus, PageAgent};
use crate::host::{AudioEngine, MediaDocument};
use crate::levels::LevelSample;
use crate::params::ParameterPatch;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const UNKNOWN_ACTION: &str = "Unknown action";

/// Inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    UpdateAudioSettings {
        #[serde(default)]
        settings: ParameterPatch,
    },
    GetAudioStatus,
    GetAudioLevels,
    /// Liveness probe
    Ping,
}

impl Request {
    /// Decode a raw message; `None` for unrecognized actions
    ///
    /// A malformed `settings` payload decodes as an empty update so that
    /// `updateAudioSettings` keeps succeeding.
    pub fn from_message(message: &Value) -> Option<Request> {
        if let Ok(request) = Request::deserialize(message) {
            return Some(request);
        }
        match message.get("action")?.as_str()? {
            "updateAudioSettings" => Some(Request::UpdateAudioSettings {
                settings: decode_settings(message.get("settings")),
            }),
            _ => None,
        }
    }

    pub fn to_message(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn decode_settings(value: Option<&Value>) -> ParameterPatch {
    match value {
        None | Some(Value::Null) => ParameterPatch::default(),
        Some(v) => ParameterPatch::deserialize(v).unwrap_or_else(|e| {
            warn!("ignoring malformed settings: {}", e);
            ParameterPatch::default()
        }),
    }
}

/// Outbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ack { success: bool },
    Status(AudioStatus),
    Levels(LevelSample),
    Error { error: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack { success: true }
    }

    pub fn unknown_action() -> Self {
        Response::Error {
            error: UNKNOWN_ACTION.to_string(),
        }
    }

    pub fn to_message(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl<E: AudioEngine, D: MediaDocument> PageAgent<E, D> {
    /// Answer a decoded request
    pub fn handle_request(&mut self, request: Request, now: Duration) -> Response {
        match request {
            Request::UpdateAudioSettings { settings } => {
                self.dispatch(AgentEvent::ParameterUpdate(settings), now);
                Response::ok()
            }
            Request::GetAudioStatus => Response::Status(self.status()),
            Request::GetAudioLevels => Response::Levels(self.levels()),
            Request::Ping => Response::ok(),
        }
    }

    /// Answer a raw JSON message
    pub fn handle_message(&mut self, message: &Value, now: Duration) -> Value {
        let response = match Request::from_message(message) {
            Some(request) => self.handle_request(request, now),
            None => Response::unknown_action(),
        };
        response.to_message()
    }
}
