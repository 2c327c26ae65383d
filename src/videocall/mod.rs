//! Controller for one `janus.plugin.videocall` handle.
//!
//! [`VideoCall`] owns the call state machine, the peer connection and the
//! statistics sampler of its handle. UI commands come in as method calls;
//! plugin events arrive from the [`Signaller`](crate::signaller::Signaller)
//! through [`VideoCall::handle_message`]. Everything observable is published
//! on the injected [`EventBus`] as [`CallEvent`]s.

mod error;
mod stats;


pub use error::CallError;

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use janus_core::protocol::{HandleId, OutgoingFrame, SessionDescription, VIDEOCALL_PLUGIN};
use janus_core::state::{CallState, CallTransition, apply_transition};
use janus_core::stats::CallStats;
use janus_core::transaction::new_transaction;
use janus_core::videocall::{
    ErrorPayload, EventPayload, PluginMessage, SetOptions, VideoCallEvent, VideoCallRequest,
};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::RtcConfig;
use crate::events::EventBus;
use crate::media::{
    MediaConstraints, MediaEngine, OfferOptions, PeerConnection, PeerEvent, RemoteStream,
};
use crate::signaller::Gateway;
use stats::Sampler;

/// Lifecycle notifications consumed by the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The handle is attached; `register` may be called.
    Ready { handle_id: HandleId },
    /// A plugin event with its `result` fields, `event` renamed to `type`.
    Event(EventPayload),
    StateChanged(CallState),
    Stream(RemoteStream),
    UpdateStats(CallStats),
    Error(ErrorPayload),
}

/// Call state plus a counter bumped whenever the call it describes ends or
/// changes hands. Negotiations hold on to the value they started with.
struct Phase {
    state: CallState,
    generation: u64,
}

/// Result of a transition, applied by [`VideoCall::finish`] once the locks
/// are released.
struct Step {
    previous: CallState,
    next: CallState,
    generation: u64,
    retired: Option<Arc<dyn PeerConnection>>,
    sampler: Option<Sampler>,
}

pub struct VideoCall {
    gateway: Weak<dyn Gateway>,
    media: Arc<dyn MediaEngine>,
    rtc: RtcConfig,
    stats_interval: Duration,
    events: Arc<EventBus<CallEvent>>,
    handle_id: OnceLock<HandleId>,
    phase: Mutex<Phase>,
    peer: Mutex<Option<Arc<dyn PeerConnection>>>,
    remote_offer: Mutex<Option<SessionDescription>>,
    stats: Arc<Mutex<CallStats>>,
    sampler: Mutex<Option<Sampler>>,
}

impl VideoCall {
    pub fn new(
        gateway: Weak<dyn Gateway>,
        media: Arc<dyn MediaEngine>,
        rtc: RtcConfig,
        stats_interval: Duration,
        events: Arc<EventBus<CallEvent>>,
    ) -> Self {
        Self {
            gateway,
            media,
            rtc,
            stats_interval,
            events,
            handle_id: OnceLock::new(),
            phase: Mutex::new(Phase {
                state: CallState::Unregistered,
                generation: 0,
            }),
            peer: Mutex::new(None),
            remote_offer: Mutex::new(None),
            stats: Arc::new(Mutex::new(CallStats::new())),
            sampler: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &Arc<EventBus<CallEvent>> {
        &self.events
    }

    pub fn handle_id(&self) -> Option<HandleId> {
        self.handle_id.get().copied()
    }

    pub fn state(&self) -> CallState {
        self.phase
            .lock()
            .expect("Mutex should not be poisoned")
            .state
    }

    pub fn stats(&self) -> CallStats {
        self.stats
            .lock()
            .expect("Mutex should not be poisoned")
            .clone()
    }

    pub fn has_remote_offer(&self) -> bool {
        self.remote_offer
            .lock()
            .expect("Mutex should not be poisoned")
            .is_some()
    }

    pub fn has_peer(&self) -> bool {
        self.current_peer().is_some()
    }

    /// Sends `attach` for the video-call plugin and records the handle id.
    pub(crate) async fn attach(&self) -> Result<HandleId, CallError> {
        let gateway = self.gateway()?;
        let session_id = gateway.session_id().ok_or(CallError::NotConnected)?;

        let response = gateway
            .request(OutgoingFrame::Attach {
                session_id,
                plugin: VIDEOCALL_PLUGIN.to_string(),
                transaction: new_transaction(),
            })
            .await?;
        let handle_id = response.success_id().ok_or(CallError::MissingHandleId)?;

        if self.handle_id.set(handle_id).is_err() {
            warn!(target: "VideoCall", "Handle already attached, ignoring id {handle_id}");
            return Ok(self.handle_id().unwrap_or(handle_id));
        }
        info!(target: "VideoCall", "Attached handle {handle_id}");
        self.events.emit(&CallEvent::Ready { handle_id });
        Ok(handle_id)
    }

    pub async fn register(&self, username: &str) -> Result<(), CallError> {
        self.require_handle()?;
        self.send(
            VideoCallRequest::Register {
                username: username.to_string(),
            },
            None,
        )
        .await
    }

    /// Starts an outgoing call: captures media, creates and sends an offer.
    pub async fn call(&self, username: &str) -> Result<(), CallError> {
        self.require_handle()?;
        let generation = self.transition(CallTransition::LocalCall).await?;

        let mut opened: Option<Arc<dyn PeerConnection>> = None;
        let result: Result<(), CallError> = async {
            let peer = self.open_peer().await?;
            opened = Some(Arc::clone(&peer));
            self.install_peer(generation, &peer).await?;
            peer.add_local_media(MediaConstraints::default()).await?;
            let offer = peer.create_offer(OfferOptions::default()).await?;
            peer.set_local_description(offer.clone()).await?;

            self.ensure_current(generation)?;
            let request = VideoCallRequest::Call {
                username: username.to_string(),
            };
            self.send(request, Some(offer)).await
        }
        .await;

        let Err(e) = result else {
            info!(target: "VideoCall", "Calling {username}");
            return Ok(());
        };
        if self.abandon_negotiation(generation, opened, &e).await {
            Err(e)
        } else {
            Err(CallError::Cancelled)
        }
    }

    /// Accepts the pending incoming call.
    pub async fn answer(&self) -> Result<(), CallError> {
        self.require_handle()?;
        let (offer, step) = {
            let mut remote_offer = self
                .remote_offer
                .lock()
                .expect("Mutex should not be poisoned");
            if remote_offer.is_none() {
                return Err(CallError::NoRemoteOffer);
            }
            let step = self.step(None, CallTransition::LocalAnswer)?;
            (remote_offer.take().ok_or(CallError::NoRemoteOffer)?, step)
        };
        let generation = self.finish(step, CallTransition::LocalAnswer).await;

        let mut opened: Option<Arc<dyn PeerConnection>> = None;
        let result: Result<(), CallError> = async {
            let peer = self.open_peer().await?;
            opened = Some(Arc::clone(&peer));
            self.install_peer(generation, &peer).await?;
            peer.add_local_media(MediaConstraints::default()).await?;
            peer.set_remote_description(offer).await?;
            let answer = peer.create_answer().await?;
            peer.set_local_description(answer.clone()).await?;

            self.ensure_current(generation)?;
            self.send(VideoCallRequest::Accept, Some(answer)).await
        }
        .await;

        let Err(e) = result else {
            info!(target: "VideoCall", "Call answered");
            self.start_stats(generation);
            return Ok(());
        };
        if !self.abandon_negotiation(generation, opened, &e).await {
            return Err(CallError::Cancelled);
        }
        // Release the caller, who is still waiting on us.
        if let Err(hangup_err) = self.send_hangup().await {
            debug!(target: "VideoCall", "Hangup after failed answer not sent: {hangup_err}");
        }
        Err(e)
    }

    /// Hangs up an outgoing, incoming or established call.
    pub async fn decline(&self) -> Result<(), CallError> {
        self.require_handle()?;
        self.transition(CallTransition::LocalDecline).await?;
        self.take_remote_offer();
        self.send_hangup().await
    }

    /// Toggles audio/video on the gateway side of the current call.
    pub async fn set(&self, options: SetOptions) -> Result<(), CallError> {
        self.require_handle()?;
        if self.current_peer().is_none() {
            return Err(CallError::NoPeerConnection);
        }
        self.send(VideoCallRequest::Set(options), None).await
    }

    /// Handles `plugindata.data` (and the optional `jsep`) of an event frame.
    pub async fn handle_message(&self, data: &Value, jsep: Option<SessionDescription>) {
        match PluginMessage::parse(data) {
            PluginMessage::Error(error) => {
                warn!(target: "VideoCall", "Plugin error: {error}");
                self.events.emit(&CallEvent::Error(error));
            }
            PluginMessage::Event(payload) => self.handle_event(payload, jsep).await,
            PluginMessage::Unrecognized(value) => {
                debug!(target: "VideoCall", "VC message: {value}");
            }
        }
    }

    async fn handle_event(&self, payload: EventPayload, jsep: Option<SessionDescription>) {
        match &payload.event {
            VideoCallEvent::Registered { username } => {
                info!(target: "VideoCall", "Registered as {username}");
                self.apply(CallTransition::Registered).await;
            }
            VideoCallEvent::Accepted { .. } => {
                if let Some(answer) = jsep
                    && let Some(peer) = self.current_peer()
                {
                    let generation = self.generation();
                    if let Err(e) = peer.set_remote_description(answer).await {
                        let error = CallError::from(e);
                        self.abandon_negotiation(generation, Some(peer), &error)
                            .await;
                        return;
                    }
                }
                if let Some(generation) = self.apply(CallTransition::RemoteAccepted).await {
                    self.start_stats(generation);
                }
            }
            VideoCallEvent::IncomingCall { username } => {
                let Some(offer) = jsep else {
                    warn!(target: "VideoCall", "Incoming call from {username} without an offer");
                    self.events.emit(&CallEvent::Error(ErrorPayload::local(
                        "incoming call carried no session description",
                    )));
                    return;
                };
                info!(target: "VideoCall", "Incoming call from {username}");
                *self
                    .remote_offer
                    .lock()
                    .expect("Mutex should not be poisoned") = Some(offer);
                // Supersedes whatever call was in progress.
                self.apply(CallTransition::IncomingCall).await;
            }
            VideoCallEvent::Hangup { reason, .. } => {
                info!(
                    target: "VideoCall",
                    "Hangup: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.take_remote_offer();
                self.apply(CallTransition::RemoteHangup).await;
            }
            VideoCallEvent::Set => return,
            VideoCallEvent::Calling | VideoCallEvent::Update | VideoCallEvent::Unknown => {}
        }

        self.events.emit(&CallEvent::Event(payload));
    }

    /// Releases everything tied to the session: called when it is destroyed
    /// or lost.
    pub(crate) async fn shutdown(&self) {
        self.take_remote_offer();
        self.apply(CallTransition::SessionLost).await;
    }

    async fn send(
        &self,
        request: VideoCallRequest,
        jsep: Option<SessionDescription>,
    ) -> Result<(), CallError> {
        let handle_id = self.require_handle()?;
        let gateway = self.gateway()?;
        let session_id = gateway.session_id().ok_or(CallError::NotConnected)?;
        debug!(target: "VideoCall", "Sending {} on handle {handle_id}", request.name());

        gateway
            .send_frame(&OutgoingFrame::Message {
                session_id,
                handle_id,
                transaction: new_transaction(),
                body: request.to_body()?,
                jsep,
            })
            .await?;
        Ok(())
    }

    async fn send_hangup(&self) -> Result<(), CallError> {
        self.send(VideoCallRequest::Hangup, None).await
    }

    fn gateway(&self) -> Result<Arc<dyn Gateway>, CallError> {
        self.gateway.upgrade().ok_or(CallError::NotConnected)
    }

    fn require_handle(&self) -> Result<HandleId, CallError> {
        self.handle_id().ok_or(CallError::NotReady)
    }

    fn generation(&self) -> u64 {
        self.phase
            .lock()
            .expect("Mutex should not be poisoned")
            .generation
    }

    fn ensure_current(&self, generation: u64) -> Result<(), CallError> {
        if self.generation() == generation {
            Ok(())
        } else {
            Err(CallError::Cancelled)
        }
    }

    /// Applies `transition` under the state lock. With `expected` set, a
    /// stale generation yields [`CallError::Cancelled`].
    ///
    /// A transition that ends the call detaches the peer and the sampler in
    /// the same critical section, so no negotiation can install into a call
    /// that is already over.
    fn step(
        &self,
        expected: Option<u64>,
        transition: CallTransition,
    ) -> Result<Step, CallError> {
        let mut phase = self.phase.lock().expect("Mutex should not be poisoned");
        if let Some(expected) = expected
            && phase.generation != expected
        {
            return Err(CallError::Cancelled);
        }

        let previous = phase.state;
        let next = apply_transition(previous, transition)?;
        phase.state = next;

        let ends_call = transition.ends_call();
        if previous != next || ends_call {
            phase.generation += 1;
        }
        let (retired, sampler) = if ends_call {
            (
                self.peer.lock().expect("Mutex should not be poisoned").take(),
                self.sampler
                    .lock()
                    .expect("Mutex should not be poisoned")
                    .take(),
            )
        } else {
            (None, None)
        };

        Ok(Step {
            previous,
            next,
            generation: phase.generation,
            retired,
            sampler,
        })
    }

    /// Publishes a step and releases what it detached.
    async fn finish(&self, step: Step, transition: CallTransition) -> u64 {
        if let Some(sampler) = step.sampler {
            debug!(target: "VideoCall/Stats", "Stopping stats sampler");
            sampler.stop();
        }
        if step.previous != step.next {
            debug!(
                target: "VideoCall",
                "State {:?} -> {:?} on {transition:?}",
                step.previous,
                step.next
            );
            self.events.emit(&CallEvent::StateChanged(step.next));
        }
        if let Some(peer) = step.retired {
            peer.close().await;
        }
        step.generation
    }

    /// Applies a transition and publishes the new state. Returns the
    /// generation the caller now owns.
    async fn transition(&self, transition: CallTransition) -> Result<u64, CallError> {
        let step = self.step(None, transition)?;
        Ok(self.finish(step, transition).await)
    }

    /// Like [`Self::transition`] for gateway-driven input: an illegal
    /// transition is logged and ignored.
    async fn apply(&self, transition: CallTransition) -> Option<u64> {
        match self.transition(transition).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                warn!(target: "VideoCall", "Ignoring event: {e}");
                None
            }
        }
    }

    /// Cleans up after a negotiation of `generation` failed. Only the peer
    /// this negotiation opened is closed. The failure is reported, and the
    /// state reverted, only while the negotiation still owns the call.
    async fn abandon_negotiation(
        &self,
        generation: u64,
        opened: Option<Arc<dyn PeerConnection>>,
        error: &CallError,
    ) -> bool {
        if let Some(peer) = opened {
            {
                let mut slot = self.peer.lock().expect("Mutex should not be poisoned");
                if slot.as_ref().is_some_and(|p| Arc::ptr_eq(p, &peer)) {
                    slot.take();
                }
            }
            peer.close().await;
        }

        if matches!(error, CallError::Cancelled) || self.generation() != generation {
            debug!(target: "VideoCall", "Dropping superseded negotiation: {error}");
            return false;
        }

        warn!(target: "VideoCall", "Negotiation failed: {error}");
        self.events
            .emit(&CallEvent::Error(ErrorPayload::local(error.to_string())));
        match self.step(Some(generation), CallTransition::NegotiationFailed) {
            Ok(step) => {
                self.finish(step, CallTransition::NegotiationFailed).await;
            }
            Err(e) => debug!(target: "VideoCall", "Not reverting after failure: {e}"),
        }
        true
    }

    /// Creates a peer connection without making it the call's peer.
    async fn open_peer(&self) -> Result<Arc<dyn PeerConnection>, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = self.media.create_peer(&self.rtc, tx).await?;
        tokio::spawn(forward_peer_events(rx, Arc::clone(&self.events)));
        Ok(peer)
    }

    /// Makes `peer` the call's peer if `generation` still owns the call.
    async fn install_peer(
        &self,
        generation: u64,
        peer: &Arc<dyn PeerConnection>,
    ) -> Result<(), CallError> {
        let previous = {
            let phase = self.phase.lock().expect("Mutex should not be poisoned");
            if phase.generation != generation {
                return Err(CallError::Cancelled);
            }
            self.peer
                .lock()
                .expect("Mutex should not be poisoned")
                .replace(Arc::clone(peer))
        };
        if let Some(previous) = previous
            && !Arc::ptr_eq(&previous, peer)
        {
            previous.close().await;
        }
        Ok(())
    }

    fn current_peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.peer
            .lock()
            .expect("Mutex should not be poisoned")
            .clone()
    }

    fn take_remote_offer(&self) -> Option<SessionDescription> {
        self.remote_offer
            .lock()
            .expect("Mutex should not be poisoned")
            .take()
    }

    /// Starts the sampler for `generation` unless one is already running.
    fn start_stats(&self, generation: u64) {
        let phase = self.phase.lock().expect("Mutex should not be poisoned");
        if phase.generation != generation {
            debug!(target: "VideoCall/Stats", "Call already ended, not sampling");
            return;
        }
        let Some(peer) = self.current_peer() else {
            debug!(target: "VideoCall/Stats", "No peer connection, not sampling");
            return;
        };
        let mut sampler = self.sampler.lock().expect("Mutex should not be poisoned");
        if sampler.as_ref().is_some_and(Sampler::is_running) {
            return;
        }

        self.stats
            .lock()
            .expect("Mutex should not be poisoned")
            .reset();
        *sampler = Some(Sampler::spawn(
            peer,
            Arc::clone(&self.stats),
            Arc::clone(&self.events),
            self.stats_interval,
        ));
    }
}

impl fmt::Debug for VideoCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoCall")
            .field("handle_id", &self.handle_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for VideoCall {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sampler.lock()
            && let Some(sampler) = slot.take()
        {
            sampler.stop();
        }
    }
}

async fn forward_peer_events(
    mut rx: mpsc::UnboundedReceiver<PeerEvent>,
    events: Arc<EventBus<CallEvent>>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PeerEvent::RemoteStream(stream) => {
                debug!(target: "VideoCall", "Remote {:?} track {}", stream.kind, stream.track_id);
                events.emit(&CallEvent::Stream(stream));
            }
            PeerEvent::ConnectionState(state) => {
                debug!(target: "VideoCall", "On connection state: {state}");
            }
            PeerEvent::IceConnectionState(state) => {
                debug!(target: "VideoCall", "On ICE connection state change: {state}");
            }
        }
    }
}
