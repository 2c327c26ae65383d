//! [`MediaEngine`] backed by the `webrtc` crate.
//!
//! Local media is exposed as sample-fed Opus/VP8 tracks; whatever owns the
//! capture devices writes into them through [`WebRtcPeer::audio_track`] and
//! [`WebRtcPeer::video_track`].

use std::sync::Arc;

use async_trait::async_trait;
use janus_core::protocol::{SdpType, SessionDescription};
use janus_core::stats::{MediaKind, RtpStreamStats, StatsReport};
use log::{debug, warn};
use tokio::sync::{Mutex, mpsc};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine as RtcMediaEngine};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{
    MediaConstraints, MediaEngine, MediaError, OfferOptions, PeerConnection, PeerEvent,
    RemoteStream,
};
use crate::config::{IceTransportPolicy, RtcConfig};

const LOCAL_STREAM_ID: &str = "janus-videocall";

impl From<webrtc::Error> for MediaError {
    fn from(e: webrtc::Error) -> Self {
        MediaError::Negotiation(e.to_string())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcEngine;

impl WebRtcEngine {
    pub fn new() -> Self {
        Self
    }

    fn create_api() -> Result<webrtc::api::API, MediaError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

fn rtc_configuration(config: &RtcConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_transport_policy: match config.ice_transport_policy {
            IceTransportPolicy::All => RTCIceTransportPolicy::All,
            IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        },
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn media_kind(codec: RTPCodecType) -> MediaKind {
    match codec {
        RTPCodecType::Audio => MediaKind::Audio,
        _ => MediaKind::Video,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(MediaError::Negotiation(
                "rollback descriptions are not supported".into(),
            ));
        }
    };
    Ok(rtc)
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription, MediaError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(MediaError::Negotiation(format!(
                "unexpected description type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_peer(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, MediaError> {
        let api = Self::create_api()?;
        let pc = Arc::new(api.new_peer_connection(rtc_configuration(config)).await?);

        let tx = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::RemoteStream(RemoteStream {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    kind: media_kind(track.kind()),
                }));
            })
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::ConnectionState(state.to_string()));
            })
        }));

        let tx = events;
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::IceConnectionState(state.to_string()));
            })
        }));

        Ok(Arc::new(WebRtcPeer {
            pc,
            audio_track: Mutex::new(None),
            video_track: Mutex::new(None),
        }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    audio_track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    video_track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
}

impl WebRtcPeer {
    pub async fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio_track.lock().await.clone()
    }

    pub async fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video_track.lock().await.clone()
    }

    async fn add_sample_track(
        &self,
        mime_type: &str,
        track_id: &str,
    ) -> Result<Arc<TrackLocalStaticSample>, MediaError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track_id.to_owned(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        self.pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaError::Capture(e.to_string()))?;
        Ok(track)
    }

    async fn add_receive_only(&self, kind: RTPCodecType) -> Result<(), MediaError> {
        self.pc
            .add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_local_media(&self, constraints: MediaConstraints) -> Result<(), MediaError> {
        if constraints.audio {
            let track = self.add_sample_track(MIME_TYPE_OPUS, "audio").await?;
            *self.audio_track.lock().await = Some(track);
        }
        if constraints.video {
            let track = self.add_sample_track(MIME_TYPE_VP8, "video").await?;
            *self.video_track.lock().await = Some(track);
        }
        Ok(())
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, MediaError> {
        if options.receive_audio && self.audio_track.lock().await.is_none() {
            self.add_receive_only(RTPCodecType::Audio).await?;
        }
        if options.receive_video && self.video_track.lock().await.is_none() {
            self.add_receive_only(RTPCodecType::Video).await?;
        }

        let offer = self
            .pc
            .create_offer(Some(RTCOfferOptions {
                voice_activity_detection: options.voice_activity_detection,
                ..Default::default()
            }))
            .await?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<StatsReport>, MediaError> {
        let report = self.pc.get_stats().await;
        let reports = report
            .reports
            .into_values()
            .map(|entry| match entry {
                StatsReportType::InboundRTP(s) => StatsReport::InboundRtp(RtpStreamStats {
                    kind: if s.kind == "audio" {
                        MediaKind::Audio
                    } else {
                        MediaKind::Video
                    },
                    bytes: s.bytes_received,
                    frame_width: None,
                    frame_height: None,
                }),
                StatsReportType::OutboundRTP(s) => StatsReport::OutboundRtp(RtpStreamStats {
                    kind: if s.kind == "audio" {
                        MediaKind::Audio
                    } else {
                        MediaKind::Video
                    },
                    bytes: s.bytes_sent,
                    frame_width: None,
                    frame_height: None,
                }),
                _ => StatsReport::Other,
            })
            .collect();
        Ok(reports)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(target: "VideoCall", "Error closing peer connection: {e}");
        } else {
            debug!(target: "VideoCall", "Peer connection closed");
        }
    }
}
