use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use janus_core::stats::CallStats;
use log::{trace, warn};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::CallEvent;
use crate::events::EventBus;
use crate::media::PeerConnection;

/// Periodic stats task of one call.
pub(super) struct Sampler {
    task: JoinHandle<()>,
    stopped: Arc<Mutex<bool>>,
}

impl Sampler {
    /// Samples `peer` every `interval` until stopped.
    ///
    /// Timestamps advance with the runtime clock from a wall-clock origin
    /// taken at spawn time.
    pub(super) fn spawn(
        peer: Arc<dyn PeerConnection>,
        stats: Arc<Mutex<CallStats>>,
        events: Arc<EventBus<CallEvent>>,
        interval: Duration,
    ) -> Self {
        let stopped = Arc::new(Mutex::new(false));
        let task = tokio::spawn(sample_loop(
            peer,
            stats,
            events,
            interval,
            Arc::clone(&stopped),
        ));
        Self { task, stopped }
    }

    pub(super) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Once this returns, no further `UpdateStats` is emitted.
    pub(super) fn stop(self) {
        self.halt();
        self.task.abort();
    }

    fn halt(&self) {
        // Waits out an emission in progress on another worker.
        *self.stopped.lock().expect("Mutex should not be poisoned") = true;
    }
}

async fn sample_loop(
    peer: Arc<dyn PeerConnection>,
    stats: Arc<Mutex<CallStats>>,
    events: Arc<EventBus<CallEvent>>,
    interval: Duration,
    stopped: Arc<Mutex<bool>>,
) {
    let origin = (Utc::now(), Instant::now());

    loop {
        tokio::time::sleep(interval).await;

        let reports = match peer.stats().await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(target: "VideoCall/Stats", "Failed to read peer stats: {e}");
                continue;
            }
        };

        let now =
            origin.0 + TimeDelta::from_std(origin.1.elapsed()).unwrap_or(TimeDelta::zero());
        let snapshot = {
            let mut stats = stats.lock().expect("Mutex should not be poisoned");
            stats.apply_sample(&reports, now);
            stats.clone()
        };
        trace!(
            target: "VideoCall/Stats",
            "in {} kbps, out {} kbps",
            snapshot.incoming_kbps,
            snapshot.outgoing_kbps
        );

        {
            let stopped = stopped.lock().expect("Mutex should not be poisoned");
            if *stopped {
                return;
            }
            events.emit(&CallEvent::UpdateStats(snapshot));
        }
    }
}
