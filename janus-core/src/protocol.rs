//! JSON frames exchanged with the Janus gateway over the WebSocket.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully-qualified name of the video-call plugin on the gateway.
pub const VIDEOCALL_PLUGIN: &str = "janus.plugin.videocall";

/// WebSocket sub-protocol the gateway expects during the handshake.
pub const JANUS_SUBPROTOCOL: &str = "janus-protocol";

pub type SessionId = u64;
pub type HandleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An SDP offer or answer, carried as `jsep` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Requests sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum OutgoingFrame {
    Create {
        transaction: String,
    },
    Keepalive {
        session_id: SessionId,
        transaction: String,
    },
    Destroy {
        session_id: SessionId,
        transaction: String,
    },
    Attach {
        session_id: SessionId,
        plugin: String,
        transaction: String,
    },
    Message {
        session_id: SessionId,
        handle_id: HandleId,
        transaction: String,
        body: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jsep: Option<SessionDescription>,
    },
}

impl OutgoingFrame {
    pub fn transaction(&self) -> &str {
        match self {
            Self::Create { transaction }
            | Self::Keepalive { transaction, .. }
            | Self::Destroy { transaction, .. }
            | Self::Attach { transaction, .. }
            | Self::Message { transaction, .. } => transaction,
        }
    }

    /// The `janus` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Keepalive { .. } => "keepalive",
            Self::Destroy { .. } => "destroy",
            Self::Attach { .. } => "attach",
            Self::Message { .. } => "message",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessData {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    pub plugin: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gateway error {}: {}", self.code, self.reason)
    }
}

impl std::error::Error for GatewayError {}

/// Frames received from the gateway, discriminated by the `janus` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum IncomingFrame {
    Ack {
        #[serde(default)]
        transaction: Option<String>,
    },
    Success {
        #[serde(default)]
        transaction: Option<String>,
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        sender: Option<HandleId>,
        #[serde(default)]
        data: Option<SuccessData>,
        #[serde(default)]
        plugindata: Option<PluginData>,
    },
    Event {
        #[serde(default)]
        transaction: Option<String>,
        #[serde(default)]
        sender: Option<HandleId>,
        #[serde(default)]
        plugindata: Option<PluginData>,
        #[serde(default)]
        jsep: Option<SessionDescription>,
    },
    Media {
        #[serde(default)]
        sender: Option<HandleId>,
        #[serde(default, rename = "type")]
        media_type: Option<String>,
        #[serde(default)]
        receiving: Option<bool>,
    },
    Hangup {
        #[serde(default)]
        sender: Option<HandleId>,
        #[serde(default)]
        reason: Option<String>,
    },
    Webrtcup {
        #[serde(default)]
        sender: Option<HandleId>,
    },
    Error {
        #[serde(default)]
        transaction: Option<String>,
        error: GatewayError,
    },
    #[serde(other)]
    Unknown,
}

impl IncomingFrame {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn transaction(&self) -> Option<&str> {
        match self {
            Self::Ack { transaction }
            | Self::Success { transaction, .. }
            | Self::Event { transaction, .. }
            | Self::Error { transaction, .. } => transaction.as_deref(),
            _ => None,
        }
    }

    /// The id carried in `data.id` of a `success` response.
    pub fn success_id(&self) -> Option<u64> {
        match self {
            Self::Success {
                data: Some(data), ..
            } => Some(data.id),
            _ => None,
        }
    }
}
