//! Video-call controller error types.

use thiserror::Error;

use crate::media::MediaError;
use crate::request::RequestError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("plugin handle is not attached yet")]
    NotReady,

    #[error("not connected")]
    NotConnected,

    #[error("attach response carried no handle id")]
    MissingHandleId,

    #[error("answer() called without a pending remote offer")]
    NoRemoteOffer,

    #[error("no active peer connection")]
    NoPeerConnection,

    #[error("call was ended while negotiating")]
    Cancelled,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] janus_core::state::InvalidTransition),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("failed to build request body: {0}")]
    Serialize(#[from] serde_json::Error),
}
