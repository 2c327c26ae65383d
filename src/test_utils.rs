use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use janus_core::protocol::{SessionDescription, SessionId};
use janus_core::stats::StatsReport;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::config::{ClientConfig, RtcConfig};
use crate::events::EventBus;
use crate::media::{
    MediaConstraints, MediaEngine, MediaError, OfferOptions, PeerConnection, PeerEvent,
};
use crate::signaller::{Signaller, VIDEO_CALL};
use crate::transport::mock::MockTransportFactory;
use crate::videocall::{CallEvent, VideoCall};

pub const TEST_OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=offer\r\n";
pub const TEST_ANSWER_SDP: &str = "v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\ns=answer\r\n";

/// Scripted peer connection: records descriptions, serves canned stats.
#[derive(Default)]
pub struct MockPeer {
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub stats: Mutex<Vec<StatsReport>>,
    pub closed: AtomicBool,
    fail_capture: bool,
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
    stats_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockPeer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Parks the next `stats()` call until the returned sender fires.
    pub fn hold_stats(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.stats_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Pushes an engine event as if the WebRTC stack raised it.
    pub fn raise(&self, event: PeerEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_local_media(&self, _constraints: MediaConstraints) -> Result<(), MediaError> {
        if self.fail_capture {
            return Err(MediaError::Capture("camera unavailable".into()));
        }
        Ok(())
    }

    async fn create_offer(&self, _options: OfferOptions) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::offer(TEST_OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        if self.remote.lock().unwrap().is_none() {
            return Err(MediaError::Negotiation("no remote description".into()));
        }
        Ok(SessionDescription::answer(TEST_ANSWER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        *self.local.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed);
        }
        *self.remote.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<StatsReport>, MediaError> {
        let gate = self.stats_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(self.stats.lock().unwrap().clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }
}

/// Hands out [`MockPeer`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockMediaEngine {
    pub peers: Mutex<Vec<Arc<MockPeer>>>,
    pub fail_capture: AtomicBool,
    peer_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockMediaEngine {
    pub fn failing_capture() -> Self {
        let engine = Self::default();
        engine.fail_capture.store(true, Ordering::SeqCst);
        engine
    }

    /// Parks the next `create_peer` until the returned sender fires.
    pub fn hold_next_peer(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.peer_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn last_peer(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().unwrap().last().cloned()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_peer(
        &self,
        _config: &RtcConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, MediaError> {
        let gate = self.peer_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let peer = Arc::new(MockPeer {
            fail_capture: self.fail_capture.load(Ordering::SeqCst),
            events: Mutex::new(Some(events)),
            ..Default::default()
        });
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer)
    }
}

pub fn create_test_signaller() -> (Arc<Signaller>, Arc<MockTransportFactory>) {
    create_test_signaller_with_media(Arc::new(MockMediaEngine::default()))
}

pub fn create_test_signaller_with_media(
    media: Arc<dyn MediaEngine>,
) -> (Arc<Signaller>, Arc<MockTransportFactory>) {
    let factory = Arc::new(MockTransportFactory::new());
    let signaller = Signaller::new(ClientConfig::default(), factory.clone(), media);
    (signaller, factory)
}

/// Every frame the signaller wrote, parsed back into JSON.
pub fn sent_frames(factory: &MockTransportFactory) -> Vec<serde_json::Value> {
    factory
        .transport
        .sent()
        .iter()
        .map(|text| serde_json::from_str(text).unwrap())
        .collect()
}

/// Lets spawned tasks run until at least `count` frames were written.
pub async fn wait_for_sent(factory: &MockTransportFactory, count: usize) {
    for _ in 0..1000 {
        if factory.transport.sent().len() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "expected {count} sent frames, got {:?}",
        factory.transport.sent()
    );
}

/// Yields enough times for queued transport events to be processed.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Runs `init` against the mock gateway, answering `create` with `session_id`.
pub async fn connect_signaller(
    signaller: &Arc<Signaller>,
    factory: &MockTransportFactory,
    session_id: SessionId,
) -> SessionId {
    let already_sent = factory.transport.sent().len();
    let task = {
        let signaller = Arc::clone(signaller);
        tokio::spawn(async move { signaller.init().await })
    };
    wait_for_sent(factory, already_sent + 1).await;

    let create = &sent_frames(factory)[already_sent];
    factory
        .inject_json(json!({
            "janus": "success",
            "transaction": create["transaction"],
            "data": {"id": session_id}
        }))
        .await;

    task.await.unwrap().unwrap()
}

/// Attaches the video-call plugin, answering `attach` with `handle_id`.
pub async fn attach_video_call(
    signaller: &Arc<Signaller>,
    factory: &MockTransportFactory,
    events: Arc<EventBus<CallEvent>>,
    handle_id: u64,
) -> Arc<VideoCall> {
    let already_sent = factory.transport.sent().len();
    let task = {
        let signaller = Arc::clone(signaller);
        tokio::spawn(async move { signaller.attach(VIDEO_CALL, events).await })
    };
    wait_for_sent(factory, already_sent + 1).await;

    let attach = &sent_frames(factory)[already_sent];
    factory
        .inject_json(json!({
            "janus": "success",
            "session_id": attach["session_id"],
            "transaction": attach["transaction"],
            "data": {"id": handle_id}
        }))
        .await;

    task.await.unwrap().unwrap()
}
