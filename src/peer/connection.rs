use crate::config::SessionConfig;
use crate::error::{EngineError, Error, Result};
use crate::media::MediaTrack;
use crate::peer::data_channel::{ChannelTransport, DataChannel, RtcChannel};
use crate::peer::engine::{ChannelInit, EngineFactory, EventSink, NegotiationEngine, PeerEvent};
use crate::peer::ice::{from_rtc, to_rtc};
use crate::peer::types::{
    ChannelRole, ConnectionState, IceCandidate, RemoteTrack, SdpType, ServerConfig,
    SessionDescription, TrackKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds `webrtc` peer connections sharing one API instance.
pub struct RtcEngineFactory {
    api: Arc<API>,
    ice_servers: Vec<ServerConfig>,
}

impl RtcEngineFactory {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| Error::Config(format!("cannot register codecs: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| Error::Config(format!("cannot register interceptors: {e}")))?;

        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(config.include_loopback_candidates);

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();

        Ok(Self {
            api: Arc::new(api),
            ice_servers: config.ice_servers.clone(),
        })
    }
}

#[async_trait]
impl EngineFactory for RtcEngineFactory {
    async fn create(&self, events: EventSink) -> Result<Box<dyn NegotiationEngine>, EngineError> {
        let pc = self
            .api
            .new_peer_connection(rtc_config(&self.ice_servers))
            .await?;
        info!(endpoint = %events.endpoint(), "created peer connection");
        Ok(Box::new(RtcEngine::new(Arc::new(pc), events)))
    }
}

/// Peer connection configuration; no servers means host candidates only.
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Negotiation engine over one `RTCPeerConnection`.
pub struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
    events: EventSink,
    audio_section: AtomicBool,
    video_section: AtomicBool,
}

impl RtcEngine {
    pub fn new(pc: Arc<RTCPeerConnection>, events: EventSink) -> Self {
        let endpoint = events.endpoint();

        pc.on_ice_candidate(Box::new({
            let events = events.clone();
            move |cand: Option<RTCIceCandidate>| {
                match cand {
                    Some(c) => {
                        if let Some(candidate) = from_rtc(endpoint, &c) {
                            events.emit(PeerEvent::CandidateDiscovered(Some(candidate)));
                        }
                    }
                    None => events.emit(PeerEvent::CandidateDiscovered(None)),
                }
                Box::pin(async {})
            }
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!(%endpoint, "ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new({
            let events = events.clone();
            move |st: RTCPeerConnectionState| {
                info!(%endpoint, "peer connection state changed to: {st:?}");
                events.emit(PeerEvent::ConnectionStateChanged(connection_state(st)));
                Box::pin(async {})
            }
        }));

        pc.on_track(Box::new({
            let events = events.clone();
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(TrackKind::Audio),
                    RTPCodecType::Video => Some(TrackKind::Video),
                    _ => None,
                };
                events.emit(PeerEvent::TrackAdded(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                }));
                Box::pin(async {})
            }
        }));

        pc.on_data_channel(Box::new({
            let events = events.clone();
            move |dc: Arc<RTCDataChannel>| {
                debug!(%endpoint, label = %dc.label(), "receive channel callback");
                let transport = RtcChannel::attach(dc, ChannelRole::Receiver, events.clone());
                events.emit(PeerEvent::ChannelOffered(DataChannel::new(
                    endpoint,
                    ChannelRole::Receiver,
                    transport,
                )));
                Box::pin(async {})
            }
        }));

        Self {
            pc,
            events,
            audio_section: AtomicBool::new(false),
            video_section: AtomicBool::new(false),
        }
    }

    fn section(&self, kind: TrackKind) -> &AtomicBool {
        match kind {
            TrackKind::Audio => &self.audio_section,
            TrackKind::Video => &self.video_section,
        }
    }

    /// Every offer asks to receive both audio and video; kinds without a
    /// local track get a receive-only transceiver.
    async fn ensure_receive_sections(&self) -> Result<(), EngineError> {
        for (kind, codec) in [
            (TrackKind::Audio, RTPCodecType::Audio),
            (TrackKind::Video, RTPCodecType::Video),
        ] {
            if self.section(kind).swap(true, Ordering::SeqCst) {
                continue;
            }
            self.pc
                .add_transceiver_from_kind(
                    codec,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await?;
            debug!(endpoint = %self.events.endpoint(), ?kind, "added receive-only transceiver");
        }
        Ok(())
    }
}

fn connection_state(st: RTCPeerConnectionState) -> ConnectionState {
    match st {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    Ok(parsed?)
}

#[async_trait]
impl NegotiationEngine for RtcEngine {
    async fn create_offer(&self) -> Result<String, EngineError> {
        self.ensure_receive_sections().await?;
        Ok(self.pc.create_offer(None).await?.sdp)
    }

    async fn create_answer(&self) -> Result<String, EngineError> {
        Ok(self.pc.create_answer(None).await?.sdp)
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        self.pc.set_local_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        self.pc.set_remote_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Option<&IceCandidate>) -> Result<(), EngineError> {
        match candidate {
            Some(c) => self.pc.add_ice_candidate(to_rtc(c)).await?,
            // the ICE agent needs no explicit end-of-candidates call
            None => debug!(endpoint = %self.events.endpoint(), "remote gathering complete"),
        }
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), EngineError> {
        let mime_type = match track.kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id.clone(),
            track.stream_id.clone(),
        ));
        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        self.section(track.kind).store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        init: ChannelInit,
    ) -> Result<Arc<dyn ChannelTransport>, EngineError> {
        let dc = self
            .pc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(init.ordered),
                    ..Default::default()
                }),
            )
            .await?;
        Ok(RtcChannel::attach(dc, ChannelRole::Sender, self.events.clone()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await?;
        Ok(())
    }
}
