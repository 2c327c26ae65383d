use crate::signaller::Signaller;
use janus_core::protocol::OutgoingFrame;
use janus_core::transaction::new_transaction;
use log::{debug, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;

impl Signaller {
    /// Spawns the heartbeat for the current session, replacing any previous one.
    pub(crate) fn start_keepalive(self: &Arc<Self>) {
        let handle = tokio::spawn(Self::keepalive_loop(
            Arc::downgrade(self),
            self.config.keepalive_interval,
        ));
        let previous = self
            .keepalive_task
            .lock()
            .expect("Mutex should not be poisoned")
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(crate) fn stop_keepalive(&self) {
        let handle = self
            .keepalive_task
            .lock()
            .expect("Mutex should not be poisoned")
            .take();
        if let Some(handle) = handle {
            debug!(target: "Signaller/Keepalive", "Stopping keepalive");
            handle.abort();
        }
    }

    async fn keepalive_loop(this: Weak<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;

            let Some(signaller) = this.upgrade() else {
                return;
            };
            let Some(session_id) = signaller.session_id() else {
                debug!(target: "Signaller/Keepalive", "No session, exiting keepalive loop.");
                return;
            };

            let frame = OutgoingFrame::Keepalive {
                session_id,
                transaction: new_transaction(),
            };
            if let Err(e) = signaller.send(&frame).await {
                warn!(target: "Signaller/Keepalive", "Keepalive failed: {e}");
            }
        }
    }
}
