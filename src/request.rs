use crate::signaller::Signaller;
use janus_core::protocol::{GatewayError, IncomingFrame, OutgoingFrame};
use log::warn;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// Failures of a single outbound gateway request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("signaller is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(anyhow::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("internal channel closed unexpectedly")]
    InternalChannelClosed,
}

impl Signaller {
    /// Sends `frame` and waits for the `success` or `error` frame carrying
    /// the same transaction.
    pub async fn send_request(&self, frame: OutgoingFrame) -> Result<IncomingFrame, RequestError> {
        let transaction = frame.transaction().to_string();

        let (tx, rx) = oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(transaction.clone(), tx);

        if let Err(e) = self.send(&frame).await {
            self.response_waiters.lock().await.remove(&transaction);
            return Err(e);
        }

        match timeout(self.config.request_timeout, rx).await {
            Ok(Ok(IncomingFrame::Error { error, .. })) => Err(RequestError::Gateway(error)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestError::InternalChannelClosed),
            Err(_) => {
                self.response_waiters.lock().await.remove(&transaction);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Hands a response frame to the request waiting on its transaction.
    /// Gives the frame back when nobody is waiting for it.
    pub(crate) async fn handle_response(&self, frame: IncomingFrame) -> Option<IncomingFrame> {
        let waiter = match frame.transaction() {
            Some(transaction) => self.response_waiters.lock().await.remove(transaction),
            None => None,
        };

        match waiter {
            Some(waiter) => {
                if let Err(frame) = waiter.send(frame) {
                    warn!(
                        target: "Signaller",
                        "Failed to deliver response for transaction {:?}. Receiver was likely dropped.",
                        frame.transaction()
                    );
                }
                None
            }
            None => Some(frame),
        }
    }

    /// Fails every outstanding request; their waiters see a closed channel.
    pub(crate) async fn clear_response_waiters(&self) {
        self.response_waiters.lock().await.clear();
    }
}
