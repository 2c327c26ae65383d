//! Seam between the call controller and the WebRTC engine doing the actual
//! capture, ICE and SDP work.

use async_trait::async_trait;
use janus_core::protocol::SessionDescription;
use janus_core::stats::{MediaKind, StatsReport};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::RtcConfig;

#[cfg(feature = "webrtc-engine")]
pub mod webrtc;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media capture failed: {0}")]
    Capture(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("peer connection is closed")]
    Closed,
    #[error("media engine error: {0}")]
    Engine(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    pub receive_audio: bool,
    pub receive_video: bool,
    pub voice_activity_detection: bool,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            receive_audio: true,
            receive_video: true,
            voice_activity_detection: true,
        }
    }
}

/// A track the remote side started sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    pub kind: MediaKind,
}

/// Notifications a peer connection pushes back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    RemoteStream(RemoteStream),
    ConnectionState(String),
    IceConnectionState(String),
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Creates a peer connection configured with the given relays. Engine
    /// callbacks are forwarded to `events`.
    async fn create_peer(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, MediaError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Captures local devices and attaches their tracks.
    async fn add_local_media(&self, constraints: MediaConstraints) -> Result<(), MediaError>;

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    /// Enumerates the current transport statistics.
    async fn stats(&self) -> Result<Vec<StatsReport>, MediaError>;

    async fn close(&self);
}
