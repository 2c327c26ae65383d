use crate::config::ClientConfig;
use crate::events::EventBus;
use crate::media::MediaEngine;
use crate::request::RequestError;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::videocall::{CallError, CallEvent, VideoCall};
use async_trait::async_trait;
use dashmap::DashMap;
use janus_core::protocol::{IncomingFrame, OutgoingFrame, SessionId, VIDEOCALL_PLUGIN};
use janus_core::transaction::new_transaction;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Plugin name accepted by [`Signaller::attach`].
pub const VIDEO_CALL: &str = "video_call";

#[derive(Debug, Clone, PartialEq)]
pub enum SignallerEvent {
    /// The gateway created our session.
    Connected { session_id: SessionId },
    /// A `success` frame no pending request was waiting for.
    Success(IncomingFrame),
    /// The socket went away without [`Signaller::destroy`] being called.
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SignallerError {
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("already connected")]
    AlreadyConnected,
    #[error("transport error: {0}")]
    Transport(anyhow::Error),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("gateway response carried no id")]
    MissingId,
    #[error("plugin '{0}' is not implemented")]
    UnsupportedPlugin(String),
    #[error(transparent)]
    Call(#[from] CallError),
}

/// What a plugin controller needs from the session it lives in.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn session_id(&self) -> Option<SessionId>;

    /// Writes a frame without waiting for any response.
    async fn send_frame(&self, frame: &OutgoingFrame) -> Result<(), RequestError>;

    /// Writes a frame and waits for its correlated `success`.
    async fn request(&self, frame: OutgoingFrame) -> Result<IncomingFrame, RequestError>;
}

/// Client side of one gateway session over one WebSocket.
pub struct Signaller {
    pub(crate) config: ClientConfig,
    transport_factory: Arc<dyn TransportFactory>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    session_id: RwLock<Option<SessionId>>,
    plugins: DashMap<String, Arc<VideoCall>>,
    pub(crate) response_waiters: Mutex<HashMap<String, oneshot::Sender<IncomingFrame>>>,
    events: Arc<EventBus<SignallerEvent>>,
    media: Arc<dyn MediaEngine>,
    pub(crate) keepalive_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    read_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    is_connecting: AtomicBool,
    expected_disconnect: AtomicBool,
}

impl Signaller {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport_factory,
            transport: Mutex::new(None),
            session_id: RwLock::new(None),
            plugins: DashMap::new(),
            response_waiters: Mutex::new(HashMap::new()),
            events: Arc::new(EventBus::new()),
            media,
            keepalive_task: std::sync::Mutex::new(None),
            read_task: std::sync::Mutex::new(None),
            is_connecting: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
        })
    }

    pub fn events(&self) -> &Arc<EventBus<SignallerEvent>> {
        &self.events
    }

    pub fn session_id(&self) -> Option<SessionId> {
        *self
            .session_id
            .read()
            .expect("RwLock should not be poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.session_id().is_some()
    }

    /// Opens the socket and creates a gateway session.
    pub async fn init(self: &Arc<Self>) -> Result<SessionId, SignallerError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(SignallerError::AlreadyConnecting);
        }

        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        if self.is_connected() {
            return Err(SignallerError::AlreadyConnected);
        }
        self.expected_disconnect.store(false, Ordering::Relaxed);

        let (transport, transport_events) = self
            .transport_factory
            .create_transport(&self.config.url)
            .await
            .map_err(SignallerError::Transport)?;
        *self.transport.lock().await = Some(transport);

        let read_task = tokio::spawn(Self::read_messages_loop(
            Arc::downgrade(self),
            transport_events,
        ));
        if let Some(previous) = self
            .read_task
            .lock()
            .expect("Mutex should not be poisoned")
            .replace(read_task)
        {
            previous.abort();
        }

        let session_id = match self.create_session().await {
            Ok(id) => id,
            Err(e) => {
                warn!(target: "Signaller", "Session creation failed: {e}");
                self.expected_disconnect.store(true, Ordering::Relaxed);
                self.close_transport().await;
                return Err(e);
            }
        };

        *self
            .session_id
            .write()
            .expect("RwLock should not be poisoned") = Some(session_id);
        self.plugins.clear();
        self.start_keepalive();

        info!(target: "Signaller", "Session {session_id} created");
        self.events.emit(&SignallerEvent::Connected { session_id });
        Ok(session_id)
    }

    async fn create_session(&self) -> Result<SessionId, SignallerError> {
        let response = self
            .send_request(OutgoingFrame::Create {
                transaction: new_transaction(),
            })
            .await?;
        response.success_id().ok_or(SignallerError::MissingId)
    }

    /// Creates the controller for `plugin` and attaches it to the session.
    ///
    /// Subscribe to `events` before calling: `Ready` is emitted before this
    /// returns.
    pub async fn attach(
        self: &Arc<Self>,
        plugin: &str,
        events: Arc<EventBus<CallEvent>>,
    ) -> Result<Arc<VideoCall>, SignallerError> {
        match plugin {
            VIDEO_CALL => {
                let gateway: Arc<dyn Gateway> = self.clone();
                let controller = Arc::new(VideoCall::new(
                    Arc::downgrade(&gateway),
                    Arc::clone(&self.media),
                    self.config.rtc.clone(),
                    self.config.stats_interval,
                    events,
                ));
                self.plugins
                    .insert(VIDEOCALL_PLUGIN.to_string(), Arc::clone(&controller));

                if let Err(e) = controller.attach().await {
                    self.plugins.remove(VIDEOCALL_PLUGIN);
                    return Err(e.into());
                }
                Ok(controller)
            }
            other => {
                warn!(target: "Signaller", "Plugin '{other}' is not implemented");
                Err(SignallerError::UnsupportedPlugin(other.to_string()))
            }
        }
    }

    /// Serializes and writes one frame.
    pub async fn send(&self, frame: &OutgoingFrame) -> Result<(), RequestError> {
        let text = frame.to_json()?;

        let transport = self.transport.lock().await.clone();
        let Some(transport) = transport else {
            warn!(target: "Signaller/Send", "Dropping {} frame: not connected", frame.kind());
            return Err(RequestError::NotConnected);
        };

        if !matches!(frame, OutgoingFrame::Keepalive { .. }) {
            debug!(target: "Signaller/Send", "--> {text}");
        }
        transport
            .send_text(&text)
            .await
            .map_err(RequestError::Transport)
    }

    /// Ends the session and closes the socket. Safe to call repeatedly.
    pub async fn destroy(&self) {
        self.expected_disconnect.store(true, Ordering::Relaxed);

        let session = self
            .session_id
            .write()
            .expect("RwLock should not be poisoned")
            .take();
        if let Some(session_id) = session {
            let frame = OutgoingFrame::Destroy {
                session_id,
                transaction: new_transaction(),
            };
            if let Err(e) = self.send(&frame).await {
                warn!(target: "Signaller", "Failed to send destroy for session {session_id}: {e}");
            }
            info!(target: "Signaller", "Session {session_id} destroyed");
        }

        self.stop_keepalive();
        self.shutdown_plugins().await;
        self.close_transport().await;
        self.clear_response_waiters().await;
    }

    async fn close_transport(&self) {
        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        let read_task = self
            .read_task
            .lock()
            .expect("Mutex should not be poisoned")
            .take();
        if let Some(read_task) = read_task {
            read_task.abort();
        }
    }

    async fn shutdown_plugins(&self) {
        let plugins: Vec<Arc<VideoCall>> = self
            .plugins
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.plugins.clear();
        for plugin in plugins {
            plugin.shutdown().await;
        }
    }

    async fn read_messages_loop(this: Weak<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        debug!(target: "Signaller", "Starting message processing loop...");

        while let Some(event) = events.recv().await {
            let Some(signaller) = this.upgrade() else {
                return;
            };
            match event {
                TransportEvent::Connected => {
                    debug!(target: "Signaller", "Transport connected event received");
                }
                TransportEvent::TextReceived(text) => signaller.handle_text(&text).await,
                TransportEvent::Disconnected => {
                    signaller.handle_disconnect().await;
                    return;
                }
            }
        }

        if let Some(signaller) = this.upgrade() {
            signaller.handle_disconnect().await;
        }
    }

    async fn handle_text(&self, text: &str) {
        let frame = match IncomingFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "Signaller/Recv", "Dropping malformed frame: {e}");
                return;
            }
        };
        if !matches!(frame, IncomingFrame::Ack { .. }) {
            debug!(target: "Signaller/Recv", "<-- {text}");
        }
        self.dispatch_frame(frame).await;
    }

    pub(crate) async fn dispatch_frame(&self, frame: IncomingFrame) {
        match frame {
            IncomingFrame::Ack { .. } => {}
            IncomingFrame::Success { .. } | IncomingFrame::Error { .. } => {
                match self.handle_response(frame).await {
                    None => {}
                    Some(IncomingFrame::Error { transaction, error }) => {
                        warn!(
                            target: "Signaller",
                            "Uncorrelated error (transaction {transaction:?}): {error}"
                        );
                    }
                    Some(success) => self.events.emit(&SignallerEvent::Success(success)),
                }
            }
            IncomingFrame::Event {
                plugindata, jsep, ..
            } => {
                let Some(plugindata) = plugindata else {
                    debug!(target: "Signaller/Recv", "Event without plugindata");
                    return;
                };
                // Clone out of the map so no shard lock is held across the await.
                let plugin = self
                    .plugins
                    .get(&plugindata.plugin)
                    .map(|entry| Arc::clone(entry.value()));
                match plugin {
                    Some(plugin) => plugin.handle_message(&plugindata.data, jsep).await,
                    None => {
                        debug!(target: "Signaller/Recv", "No plugin attached for {}", plugindata.plugin)
                    }
                }
            }
            IncomingFrame::Media { .. }
            | IncomingFrame::Hangup { .. }
            | IncomingFrame::Webrtcup { .. } => {
                trace!(target: "Signaller/Recv", "Ignoring transport-level event");
            }
            IncomingFrame::Unknown => {
                warn!(target: "Signaller/Recv", "Unhandled message");
            }
        }
    }

    async fn handle_disconnect(&self) {
        *self.transport.lock().await = None;

        if self.expected_disconnect.load(Ordering::Relaxed) {
            info!(target: "Signaller", "Transport disconnected as expected.");
            return;
        }

        info!(target: "Signaller", "Transport disconnected unexpectedly.");
        self.session_id
            .write()
            .expect("RwLock should not be poisoned")
            .take();
        self.stop_keepalive();
        self.shutdown_plugins().await;
        self.clear_response_waiters().await;
        self.events.emit(&SignallerEvent::Disconnected);
    }
}

#[async_trait]
impl Gateway for Signaller {
    fn session_id(&self) -> Option<SessionId> {
        Signaller::session_id(self)
    }

    async fn send_frame(&self, frame: &OutgoingFrame) -> Result<(), RequestError> {
        self.send(frame).await
    }

    async fn request(&self, frame: OutgoingFrame) -> Result<IncomingFrame, RequestError> {
        self.send_request(frame).await
    }
}

impl Drop for Signaller {
    fn drop(&mut self) {
        for task in [&self.keepalive_task, &self.read_task] {
            if let Ok(mut task) = task.lock()
                && let Some(handle) = task.take()
            {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        MockMediaEngine, attach_video_call, connect_signaller, create_test_signaller,
        create_test_signaller_with_media, sent_frames, settle, wait_for_sent,
    };
    use janus_core::state::CallState;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_init_creates_session_from_correlated_success() {
        let (signaller, factory) = create_test_signaller();
        let connected = Arc::new(StdMutex::new(Vec::new()));
        let connected_clone = Arc::clone(&connected);
        signaller.events().on(move |e: &SignallerEvent| {
            connected_clone.lock().unwrap().push(e.clone());
        });

        let session_id = connect_signaller(&signaller, &factory, 1234).await;

        assert_eq!(session_id, 1234);
        assert_eq!(signaller.session_id(), Some(1234));
        let frames = sent_frames(&factory);
        assert_eq!(frames[0]["janus"], "create");
        assert_eq!(frames[0]["transaction"].as_str().unwrap().len(), 12);
        assert_eq!(
            *connected.lock().unwrap(),
            vec![SignallerEvent::Connected { session_id: 1234 }]
        );
    }

    #[tokio::test]
    async fn test_later_success_frames_never_overwrite_session() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 1).await;

        let forwarded = Arc::new(StdMutex::new(Vec::new()));
        let forwarded_clone = Arc::clone(&forwarded);
        signaller.events().on(move |e: &SignallerEvent| {
            if let SignallerEvent::Success(frame) = e {
                forwarded_clone.lock().unwrap().push(frame.success_id());
            }
        });

        for id in [77, 88] {
            signaller
                .dispatch_frame(
                    IncomingFrame::from_json(
                        &json!({"janus": "success", "transaction": "other", "data": {"id": id}})
                            .to_string(),
                    )
                    .unwrap(),
                )
                .await;
        }

        assert_eq!(signaller.session_id(), Some(1));
        assert_eq!(*forwarded.lock().unwrap(), vec![Some(77), Some(88)]);
    }

    #[tokio::test]
    async fn test_init_surfaces_gateway_error() {
        let (signaller, factory) = create_test_signaller();
        let task = {
            let signaller = Arc::clone(&signaller);
            tokio::spawn(async move { signaller.init().await })
        };
        wait_for_sent(&factory, 1).await;
        let transaction = sent_frames(&factory)[0]["transaction"].clone();
        factory
            .inject_json(json!({
                "janus": "error",
                "transaction": transaction,
                "error": {"code": 490, "reason": "Bad request"}
            }))
            .await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SignallerError::Request(RequestError::Gateway(ref e)) if e.code == 490
        ));
        assert!(!signaller.is_connected());
        assert!(factory.transport.is_closed());
    }

    #[tokio::test]
    async fn test_attach_rejects_unknown_plugin() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 1).await;

        let err = signaller
            .attach("echo_test", Arc::new(EventBus::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, SignallerError::UnsupportedPlugin(ref p) if p == "echo_test"));
        assert_eq!(sent_frames(&factory).len(), 1, "no attach frame for unknown plugins");
    }

    #[tokio::test]
    async fn test_attach_sends_attach_and_emits_ready() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 10).await;

        let bus = Arc::new(EventBus::new());
        let ready = Arc::new(StdMutex::new(None));
        let ready_clone = Arc::clone(&ready);
        bus.on(move |e: &CallEvent| {
            if let CallEvent::Ready { handle_id } = e {
                *ready_clone.lock().unwrap() = Some(*handle_id);
            }
        });

        let task = {
            let signaller = Arc::clone(&signaller);
            tokio::spawn(async move { signaller.attach(VIDEO_CALL, bus).await })
        };
        wait_for_sent(&factory, 2).await;
        let attach = &sent_frames(&factory)[1];
        assert_eq!(attach["janus"], "attach");
        assert_eq!(attach["plugin"], VIDEOCALL_PLUGIN);
        assert_eq!(attach["session_id"], 10);

        factory
            .inject_json(json!({
                "janus": "success",
                "session_id": 10,
                "transaction": attach["transaction"],
                "data": {"id": 20}
            }))
            .await;

        let call = task.await.unwrap().unwrap();
        assert_eq!(call.handle_id(), Some(20));
        assert_eq!(*ready.lock().unwrap(), Some(20));
    }

    #[tokio::test]
    async fn test_plugin_events_are_routed_by_plugin_name() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 10).await;
        let bus = Arc::new(EventBus::new());
        let call = attach_video_call(&signaller, &factory, bus, 20).await;

        factory
            .inject_json(json!({
                "janus": "event",
                "session_id": 10,
                "sender": 20,
                "plugindata": {
                    "plugin": "janus.plugin.videocall",
                    "data": {"videocall": "event", "result": {"event": "registered", "username": "u1"}}
                }
            }))
            .await;
        settle().await;

        assert_eq!(call.state(), CallState::ReadyToCall);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 5).await;

        signaller.destroy().await;
        signaller.destroy().await;

        let destroys: Vec<_> = sent_frames(&factory)
            .into_iter()
            .filter(|f| f["janus"] == "destroy")
            .collect();
        assert_eq!(destroys.len(), 1);
        assert_eq!(destroys[0]["session_id"], 5);
        assert!(signaller.session_id().is_none());
        assert!(factory.transport.is_closed());
    }

    #[tokio::test]
    async fn test_destroy_shuts_down_attached_calls() {
        let media = Arc::new(MockMediaEngine::default());
        let (signaller, factory) = create_test_signaller_with_media(media.clone());
        connect_signaller(&signaller, &factory, 4).await;
        let call = attach_video_call(&signaller, &factory, Arc::new(EventBus::new()), 40).await;
        factory
            .inject_json(json!({
                "janus": "event",
                "sender": 40,
                "plugindata": {
                    "plugin": VIDEOCALL_PLUGIN,
                    "data": {"videocall": "event", "result": {"event": "registered", "username": "u1"}}
                }
            }))
            .await;
        settle().await;
        call.call("u2").await.unwrap();

        signaller.destroy().await;

        assert_eq!(call.state(), CallState::Unregistered);
        assert!(!call.has_peer());
        assert!(media.last_peer().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_destroy_without_session_sends_nothing() {
        let (signaller, factory) = create_test_signaller();
        signaller.destroy().await;
        assert!(sent_frames(&factory).is_empty());
    }

    #[tokio::test]
    async fn test_send_without_socket_fails() {
        let (signaller, _factory) = create_test_signaller();
        let err = signaller
            .send(&OutgoingFrame::Create {
                transaction: "t".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_runs_until_destroy() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 9).await;

        tokio::time::sleep(Duration::from_secs(51)).await;
        let keepalives = |frames: Vec<serde_json::Value>| {
            frames
                .into_iter()
                .filter(|f| f["janus"] == "keepalive")
                .collect::<Vec<_>>()
        };
        let sent = keepalives(sent_frames(&factory));
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["session_id"], 9);
        assert_ne!(
            sent[0]["transaction"], sent[1]["transaction"],
            "every keepalive gets its own transaction"
        );

        signaller.destroy().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(keepalives(sent_frames(&factory)).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_disconnect_tears_down_session() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 3).await;

        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&disconnected);
        signaller.events().on(move |e: &SignallerEvent| {
            if matches!(e, SignallerEvent::Disconnected) {
                flag.store(true, Ordering::SeqCst);
            }
        });

        factory.inject(TransportEvent::Disconnected).await;
        settle().await;

        assert!(disconnected.load(Ordering::SeqCst));
        assert!(signaller.session_id().is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(
            sent_frames(&factory).iter().all(|f| f["janus"] != "keepalive"),
            "keepalive must stop with the session"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let (signaller, factory) = create_test_signaller();
        connect_signaller(&signaller, &factory, 3).await;

        let err = signaller
            .send_request(OutgoingFrame::Attach {
                session_id: 3,
                plugin: VIDEOCALL_PLUGIN.into(),
                transaction: "never-answered".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Timeout));
        assert!(signaller.response_waiters.lock().await.is_empty());
    }
}
