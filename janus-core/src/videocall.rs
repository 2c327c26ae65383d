//! Request bodies and event payloads of the `janus.plugin.videocall` plugin.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Audio/video toggles sent with a `set` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
}

impl SetOptions {
    pub fn audio(enabled: bool) -> Self {
        Self {
            audio: Some(enabled),
            ..Default::default()
        }
    }

    pub fn video(enabled: bool) -> Self {
        Self {
            video: Some(enabled),
            ..Default::default()
        }
    }
}

/// The `body` of a `message` frame addressed to the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum VideoCallRequest {
    Register { username: String },
    Call { username: String },
    Accept,
    Hangup,
    Set(SetOptions),
}

impl VideoCallRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Call { .. } => "call",
            Self::Accept => "accept",
            Self::Hangup => "hangup",
            Self::Set(_) => "set",
        }
    }

    pub fn to_body(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// The `result` object of a plugin event, keyed by its `event` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum VideoCallEvent {
    Registered {
        #[serde(default)]
        username: String,
    },
    Calling,
    #[serde(rename = "incomingcall")]
    IncomingCall {
        #[serde(default)]
        username: String,
    },
    Accepted {
        #[serde(default)]
        username: Option<String>,
    },
    Hangup {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Set,
    Update,
    #[serde(other)]
    Unknown,
}

impl VideoCallEvent {
    /// The event name as surfaced to the UI (`incomingcall` becomes
    /// `incoming_call`, the rest keep the gateway's spelling).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::Calling => "calling",
            Self::IncomingCall { .. } => "incoming_call",
            Self::Accepted { .. } => "accepted",
            Self::Hangup { .. } => "hangup",
            Self::Set => "set",
            Self::Update => "update",
            Self::Unknown => "unknown",
        }
    }
}

/// An `error` reported by the plugin (or synthesised locally for media
/// failures, in which case `code` is `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: Option<i64>,
    pub reason: String,
}

impl ErrorPayload {
    pub fn local(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// A plugin event as handed to the UI: the typed event plus every field of
/// the `result` object, with `event` replaced by `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub event: VideoCallEvent,
    pub fields: Map<String, Value>,
}

impl EventPayload {
    pub fn new(event: VideoCallEvent, result: &Value) -> Self {
        let mut fields = result.as_object().cloned().unwrap_or_default();
        let kind = match (&event, fields.remove("event")) {
            // Events we do not model keep the gateway's name.
            (VideoCallEvent::Unknown, Some(Value::String(name))) => name,
            _ => event.event_type().to_string(),
        };
        fields.insert("type".to_string(), Value::String(kind));
        Self { event, fields }
    }

    pub fn event_type(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.event.event_type())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Decoded `plugindata.data` of an `event` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginMessage {
    Error(ErrorPayload),
    Event(EventPayload),
    Unrecognized(Value),
}

impl PluginMessage {
    pub fn parse(data: &Value) -> Self {
        if let Some(reason) = data.get("error") {
            let reason = match reason {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Self::Error(ErrorPayload {
                code: data.get("error_code").and_then(Value::as_i64),
                reason,
            });
        }

        let is_event = data.get("videocall").and_then(Value::as_str) == Some("event");
        match data.get("result") {
            Some(result) if is_event => match VideoCallEvent::deserialize(result) {
                Ok(event) => Self::Event(EventPayload::new(event, result)),
                Err(e) => {
                    log::warn!(target: "VideoCall", "Malformed plugin event {result}: {e}");
                    Self::Unrecognized(data.clone())
                }
            },
            _ => Self::Unrecognized(data.clone()),
        }
    }
}
