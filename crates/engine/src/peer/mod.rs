//! Per-direction WebRTC session management.
//!
//! Grounded in `frecar-beam`'s `WebRTCPeer`/`create_peer`: one
//! `RTCPeerConnection` per [`PeerController`], a media engine configured for
//! exactly the codecs this core needs, and callbacks that push straight into
//! owner-supplied channels rather than back through a god object.

mod interceptor;
pub mod rtp;
pub mod sdp;

use interceptor::{AudioLevelExtmapId, AudioLevelInterceptorBuilder};

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use lk_protocol::wire::{DataPacket, SignalTarget};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::PeerError;

/// Stream id meaning "this data channel has not opened yet".
pub const STREAM_ID_NOT_CONNECTED: u16 = 0xFFFF;

const RELIABLE_LABEL: &str = "_reliable";
const LOSSY_LABEL: &str = "_lossy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
                PeerState::Connecting
            }
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                PeerState::Disconnected
            }
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Unspecified => PeerState::Connecting,
        }
    }
}

/// Where a [`PeerController`] sends SDP answers/offers and trickled ICE
/// candidates. SDP-ready and ICE-candidate events are not part of the
/// engine's event enum, so the peer talks to the signal transport directly
/// through this handle instead of routing through the engine queue — the
/// same shape as `frecar-beam`'s `signal_tx.try_send(...)` from inside peer
/// callbacks.
pub trait SignalOutbox: Send + Sync {
    fn send_offer(&self, sdp: String);
    fn send_answer(&self, sdp: String);
    fn send_trickle(&self, candidate_json: String, target: SignalTarget);
}

/// Audio/video codec and direction configuration for [`PeerController::new`].
#[derive(Debug, Clone, Default)]
pub struct MediaConfig {
    pub publish_audio: bool,
    pub publish_video: bool,
}

/// Owner-supplied callbacks for events the peer cannot route through the
/// engine's event queue on its own.
pub struct PeerObservers {
    pub on_state_changed: Box<dyn Fn(PeerState) + Send + Sync>,
    pub on_data_packet: Box<dyn Fn(DataPacket) + Send + Sync>,
}

struct StreamIds {
    reliable: AtomicU16,
    lossy: AtomicU16,
}

impl Default for StreamIds {
    fn default() -> Self {
        Self {
            reliable: AtomicU16::new(STREAM_ID_NOT_CONNECTED),
            lossy: AtomicU16::new(STREAM_ID_NOT_CONNECTED),
        }
    }
}

/// Owns one WebRTC session (publisher or subscriber), its data channels, and
/// (for the publisher) the negotiated Opus payload type and extmap id used
/// by the RTP send transform.
pub struct PeerController {
    role: PeerRole,
    peer_connection: Arc<RTCPeerConnection>,
    audio_track: Option<Arc<TrackLocalStaticSample>>,
    video_track: Option<Arc<TrackLocalStaticSample>>,
    data_channels: AsyncMutex<(Option<Arc<RTCDataChannel>>, Option<Arc<RTCDataChannel>>)>,
    stream_ids: Arc<StreamIds>,
    audio_level_extmap_id: AudioLevelExtmapId,
    opus_payload_type: std::sync::Mutex<Option<u8>>,
}

impl PeerController {
    /// ICE transport policy is `Relay` when `force_relay` is set, otherwise
    /// `All`. Data channels are never auto-created; the publisher opens
    /// them explicitly once connected.
    pub async fn new(
        role: PeerRole,
        ice_servers: Vec<RTCIceServer>,
        force_relay: bool,
        media: MediaConfig,
        outbox: Arc<dyn SignalOutbox>,
        observers: PeerObservers,
    ) -> Result<Arc<Self>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let audio_level_extmap_id = AudioLevelExtmapId::new();
        if role == PeerRole::Publisher {
            registry.add(Box::new(AudioLevelInterceptorBuilder::new(
                audio_level_extmap_id.clone(),
            )));
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_transport_policy = if force_relay {
            RTCIceTransportPolicy::Relay
        } else {
            RTCIceTransportPolicy::All
        };

        let config = RTCConfiguration {
            ice_servers,
            ice_transport_policy,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let audio_track = if media.publish_audio && role == PeerRole::Publisher {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_string(),
                "lk-engine".to_string(),
            ));
            peer_connection
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            Some(track)
        } else {
            None
        };

        let video_track = if media.publish_video && role == PeerRole::Publisher {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_string(),
                "lk-engine".to_string(),
            ));
            peer_connection
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            Some(track)
        } else {
            None
        };

        let stream_ids = Arc::new(StreamIds::default());

        let peer = Arc::new(Self {
            role,
            peer_connection: Arc::clone(&peer_connection),
            audio_track,
            video_track,
            data_channels: AsyncMutex::new((None, None)),
            stream_ids: Arc::clone(&stream_ids),
            audio_level_extmap_id,
            opus_payload_type: std::sync::Mutex::new(None),
        });

        let on_state_changed = Arc::new(observers.on_state_changed);
        {
            let on_state_changed = Arc::clone(&on_state_changed);
            let weak_peer: Arc<Self> = Arc::clone(&peer);
            peer_connection.on_peer_connection_state_change(Box::new(move |state| {
                let peer_state = PeerState::from(state);
                match state {
                    RTCPeerConnectionState::Failed => warn!(?peer_state, "peer connection failed"),
                    RTCPeerConnectionState::Disconnected => {
                        warn!(?peer_state, "peer connection disconnected")
                    }
                    _ => info!(?peer_state, "peer connection state changed"),
                }
                // Connected is only reported once both data channels are
                // open for the publisher; the subscriber has no data
                // channels of its own and reports session state directly.
                if peer_state == PeerState::Connected && weak_peer.role == PeerRole::Publisher {
                    if weak_peer.both_channels_open() {
                        on_state_changed(PeerState::Connected);
                    }
                } else {
                    on_state_changed(peer_state);
                }
                Box::pin(async {})
            }));
        }

        {
            let outbox = Arc::clone(&outbox);
            let target = match role {
                PeerRole::Publisher => SignalTarget::Publisher,
                PeerRole::Subscriber => SignalTarget::Subscriber,
            };
            peer_connection.on_ice_candidate(Box::new(move |candidate| {
                let outbox = Arc::clone(&outbox);
                Box::pin(async move {
                    if let Some(c) = candidate {
                        match c.to_json() {
                            Ok(json) => {
                                let candidate_init = serde_json::json!({
                                    "candidate": json.candidate,
                                    "sdpMid": json.sdp_mid,
                                    "sdpMLineIndex": json.sdp_mline_index,
                                });
                                outbox.send_trickle(candidate_init.to_string(), target);
                            }
                            Err(e) => warn!("failed to serialize ICE candidate: {e}"),
                        }
                    }
                })
            }));
        }

        if role == PeerRole::Publisher {
            let stream_ids = Arc::clone(&stream_ids);
            let on_data_packet = Arc::new(observers.on_data_packet);
            peer_connection.on_data_channel(Box::new(move |dc| {
                let stream_ids = Arc::clone(&stream_ids);
                let on_data_packet = Arc::clone(&on_data_packet);
                Box::pin(async move {
                    wire_data_channel(dc, stream_ids, on_data_packet).await;
                })
            }));
        }

        // webrtc-rs derives the ICE role from the offer/answer exchange;
        // publisher-offers-first naturally makes it the controlling agent.
        Ok(peer)
    }

    fn both_channels_open(&self) -> bool {
        self.stream_ids.reliable.load(Ordering::Acquire) != STREAM_ID_NOT_CONNECTED
            && self.stream_ids.lossy.load(Ordering::Acquire) != STREAM_ID_NOT_CONNECTED
    }

    /// Explicitly create `_reliable`/`_lossy` data channels once the
    /// underlying session reaches `Connected`. Publisher-only.
    pub async fn create_data_channels(&self) -> Result<(), PeerError> {
        if self.role != PeerRole::Publisher {
            return Err(PeerError::InvalidState);
        }
        let reliable = self
            .peer_connection
            .create_data_channel(
                RELIABLE_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        let lossy = self
            .peer_connection
            .create_data_channel(
                LOSSY_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(false),
                    max_retransmits: Some(0),
                    ..Default::default()
                }),
            )
            .await?;

        let stream_ids = Arc::clone(&self.stream_ids);
        let r = Arc::clone(&reliable);
        reliable.on_open(Box::new(move || {
            stream_ids.reliable.store(r.id(), Ordering::Release);
            Box::pin(async {})
        }));
        let stream_ids = Arc::clone(&self.stream_ids);
        reliable.on_close(Box::new(move || {
            stream_ids
                .reliable
                .store(STREAM_ID_NOT_CONNECTED, Ordering::Release);
            Box::pin(async {})
        }));

        let stream_ids = Arc::clone(&self.stream_ids);
        let l = Arc::clone(&lossy);
        lossy.on_open(Box::new(move || {
            stream_ids.lossy.store(l.id(), Ordering::Release);
            Box::pin(async {})
        }));
        let stream_ids = Arc::clone(&self.stream_ids);
        lossy.on_close(Box::new(move || {
            stream_ids
                .lossy
                .store(STREAM_ID_NOT_CONNECTED, Ordering::Release);
            Box::pin(async {})
        }));

        *self.data_channels.lock().await = (Some(reliable), Some(lossy));
        Ok(())
    }

    /// Generate an SDP offer (publisher) and, before returning it, inject the
    /// audio-level header extension that the outbound RTP interceptor keys
    /// off of.
    pub async fn create_offer(&self) -> Result<String, PeerError> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        let injected = sdp::inject_audio_level_extension(&offer.sdp);
        if let Some(id) = injected.extmap_id {
            self.audio_level_extmap_id.set(id);
        }
        *self.opus_payload_type.lock().unwrap_or_else(|e| e.into_inner()) =
            injected.opus_payload_type;
        Ok(injected.sdp)
    }

    /// Handle an inbound SDP message: the publisher's answer, or the
    /// subscriber's offer (which generates and returns an answer to send
    /// back through the outbox).
    pub async fn handle_sdp(&self, sdp_type: &str, sdp: &str) -> Result<Option<String>, PeerError> {
        let desc = match sdp_type {
            "offer" => RTCSessionDescription::offer(sdp.to_string())
                .map_err(|_| PeerError::InvalidArg("malformed offer sdp"))?,
            "answer" => RTCSessionDescription::answer(sdp.to_string())
                .map_err(|_| PeerError::InvalidArg("malformed answer sdp"))?,
            _ => return Err(PeerError::InvalidArg("unknown sdp type")),
        };
        let is_offer = sdp_type == "offer";
        self.peer_connection.set_remote_description(desc).await?;
        if is_offer {
            let answer = self.peer_connection.create_answer(None).await?;
            self.peer_connection
                .set_local_description(answer.clone())
                .await?;
            Ok(Some(answer.sdp))
        } else {
            Ok(None)
        }
    }

    pub async fn handle_ice_candidate(&self, candidate: &str) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_string(),
            ..Default::default()
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    /// Select the reliable or lossy stream and send an encoded data packet.
    pub async fn send_data_packet(&self, packet: &DataPacket, reliable: bool) -> Result<(), PeerError> {
        if !self.both_channels_open() {
            return Err(PeerError::InvalidState);
        }
        let bytes = lk_protocol::codec::encode_data_packet(packet)?;
        let channels = self.data_channels.lock().await;
        let dc = if reliable {
            channels.0.as_ref()
        } else {
            channels.1.as_ref()
        };
        let Some(dc) = dc else {
            return Err(PeerError::InvalidState);
        };
        dc.send(&bytes).await?;
        Ok(())
    }

    /// Publisher-only (asserted): push an encoded audio sample.
    pub async fn send_audio(&self, data: &[u8], duration_ns: u64) -> Result<(), PeerError> {
        assert_eq!(self.role, PeerRole::Publisher, "send_audio on subscriber peer");
        let Some(track) = &self.audio_track else {
            return Err(PeerError::InvalidState);
        };
        track
            .write_sample(&webrtc::media::Sample {
                data: bytes::Bytes::copy_from_slice(data),
                duration: std::time::Duration::from_nanos(duration_ns),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Publisher-only (asserted): push an encoded video sample.
    pub async fn send_video(&self, data: &[u8], duration_ns: u64) -> Result<(), PeerError> {
        assert_eq!(self.role, PeerRole::Publisher, "send_video on subscriber peer");
        let Some(track) = &self.video_track else {
            return Err(PeerError::InvalidState);
        };
        track
            .write_sample(&webrtc::media::Sample {
                data: bytes::Bytes::copy_from_slice(data),
                duration: std::time::Duration::from_nanos(duration_ns),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    pub fn opus_payload_type(&self) -> Option<u8> {
        *self.opus_payload_type.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn audio_level_extmap_id(&self) -> Option<u8> {
        self.audio_level_extmap_id.get()
    }

    pub async fn close(&self) -> Result<(), PeerError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

async fn wire_data_channel(
    dc: Arc<RTCDataChannel>,
    stream_ids: Arc<StreamIds>,
    on_data_packet: Arc<Box<dyn Fn(DataPacket) + Send + Sync>>,
) {
    let label = dc.label().to_string();
    let is_reliable = label == RELIABLE_LABEL;
    info!(label, "data channel opened by remote");

    let ids = Arc::clone(&stream_ids);
    let id = dc.id();
    dc.on_open(Box::new(move || {
        if is_reliable {
            ids.reliable.store(id, Ordering::Release);
        } else {
            ids.lossy.store(id, Ordering::Release);
        }
        Box::pin(async {})
    }));

    let cb = Arc::clone(&on_data_packet);
    dc.on_message(Box::new(move |msg| {
        let cb = Arc::clone(&cb);
        Box::pin(async move {
            match lk_protocol::codec::decode_data_packet(&msg.data) {
                Ok(packet) => cb(packet),
                Err(lk_protocol::MessageError::NotSupported) => {}
                Err(e) => warn!("dropping malformed data packet: {e}"),
            }
        })
    }));
}

