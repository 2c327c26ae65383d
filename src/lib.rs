//! Client for the Janus WebRTC gateway's video-call plugin.
//!
//! A [`Signaller`] owns one gateway session over a WebSocket and routes plugin
//! events to the [`VideoCall`] handles attached to it. Media is kept behind
//! the [`media::MediaEngine`] seam so the signaling state machine can run
//! without a WebRTC stack.

// Protocol types and pure state live in janus-core.
pub use janus_core::{events, protocol, state, stats, transaction};

pub mod config;
mod keepalive;
pub mod media;
pub mod request;
pub mod signaller;
pub mod transport;
pub mod videocall;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::ClientConfig;
pub use signaller::{Signaller, SignallerError, SignallerEvent};
pub use videocall::{CallError, CallEvent, VideoCall};
