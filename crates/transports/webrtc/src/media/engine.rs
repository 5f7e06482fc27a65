//! webrtc-rs media engine
//!
//! One [`WebRtcEngine`] wraps one `RTCPeerConnection` carrying a single
//! outbound H.264 track fed from the shared [`RtpIngest`]. Peer connection
//! callbacks are translated into [`EngineEvent`](super::EngineEvent)s and
//! posted to the coordination loop; they never touch negotiation state.

use super::{EngineEventSink, IceCandidate, MediaEngine, MediaEngineFactory, RtpIngest, SdpKind, SdpMessage};
use crate::config::BridgeConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

/// Media engine backed by a webrtc-rs peer connection
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
    gathering_complete: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebRtcEngine {
    /// Build a peer connection with one H.264 track and wire its callbacks
    ///
    /// Any failure here is fatal to the session being built and is reported
    /// as [`Error::MediaEngineFatal`].
    #[instrument(skip_all, fields(session = %events.session()))]
    pub async fn new(
        config: &BridgeConfig,
        packets: broadcast::Receiver<Bytes>,
        events: EngineEventSink,
    ) -> Result<Self> {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: config.media.clock_rate,
            channels: 0,
            sdp_fmtp_line: config.media.sdp_fmtp_line.clone(),
            rtcp_feedback: vec![],
        };

        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: capability.clone(),
                    payload_type: config.media.payload_type,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| Error::MediaEngineFatal(format!("Failed to register H.264 codec: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::MediaEngineFatal(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::MediaEngineFatal(format!("Failed to create peer connection: {}", e)))?,
        );

        let gathering_complete = Arc::new(AtomicBool::new(false));

        // Callbacks go in before the track so the first negotiation-needed is seen
        let sink = events.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let sink = sink.clone();
            Box::pin(async move {
                sink.negotiation_needed();
            })
        }));

        let sink = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering finished for session {}", sink.session());
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let mline_index = u32::from(init.sdp_mline_index.unwrap_or(0));
                        sink.local_ice_candidate(IceCandidate::new(mline_index, init.candidate));
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let complete = Arc::clone(&gathering_complete);
        peer_connection.on_ice_gathering_state_change(Box::new(
            move |state: RTCIceGathererState| {
                if state == RTCIceGathererState::Complete {
                    complete.store(true, Ordering::SeqCst);
                }
                Box::pin(async {})
            },
        ));

        let sink = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.state_changed(state.to_string());
                    if state == RTCPeerConnectionState::Failed {
                        sink.error("peer connection failed", false);
                    }
                })
            },
        ));

        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            config.media.track_id.clone(),
            config.media.stream_id.clone(),
        ));

        let rtp_sender = peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaEngineFatal(format!("Failed to link video track: {}", e)))?;

        // Drain RTCP so interceptors (NACK, receiver reports) keep working
        let rtcp_task = tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
        });

        let forward_task = tokio::spawn(forward_rtp(packets, track, events.clone()));

        info!("Media engine ready for session {}", events.session());

        Ok(Self {
            peer_connection,
            gathering_complete,
            tasks: Mutex::new(vec![rtcp_task, forward_task]),
        })
    }

    fn description(sdp: &SdpMessage) -> Result<RTCSessionDescription> {
        let body = sdp.body().to_owned();
        let desc = match sdp.kind() {
            SdpKind::Offer => RTCSessionDescription::offer(body),
            SdpKind::Answer => RTCSessionDescription::answer(body),
        };
        desc.map_err(|e| Error::SdpError(format!("Failed to parse {}: {}", sdp.kind(), e)))
    }
}

/// Copy ingested RTP packets onto the outbound track
async fn forward_rtp(
    mut packets: broadcast::Receiver<Bytes>,
    track: Arc<TrackLocalStaticRTP>,
    events: EngineEventSink,
) {
    let mut write_errors: u64 = 0;
    loop {
        match packets.recv().await {
            Ok(packet) => {
                if let Err(e) = track.write(&packet).await {
                    write_errors += 1;
                    if write_errors.is_power_of_two() {
                        debug!("RTP write failed ({} total): {}", write_errors, e);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("RTP forwarder lagging, skipped {} packets", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                events.error("RTP ingest closed", true);
                break;
            }
        }
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SdpMessage> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Ok(SdpMessage::offer(offer.sdp))
    }

    async fn set_local_description(&self, sdp: &SdpMessage) -> Result<()> {
        let desc = Self::description(sdp)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, sdp: &SdpMessage) -> Result<()> {
        let desc = Self::description(sdp)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_remote_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let mline_index = u16::try_from(candidate.mline_index()).map_err(|_| {
            Error::IceCandidateError(format!(
                "sdpMLineIndex {} out of range",
                candidate.mline_index()
            ))
        })?;

        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate().to_owned(),
                sdp_mline_index: Some(mline_index),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    fn ice_gathering_complete(&self) -> bool {
        self.gathering_complete.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Builds [`WebRtcEngine`]s sharing one [`RtpIngest`]
pub struct WebRtcEngineFactory {
    config: Arc<BridgeConfig>,
    ingest: RtpIngest,
}

impl WebRtcEngineFactory {
    /// Bind the RTP ingest and prepare to build engines
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the RTP ingest address cannot be bound.
    pub async fn bind(config: Arc<BridgeConfig>) -> Result<Self> {
        let ingest = RtpIngest::bind(config.media.rtp_listen_addr).await?;
        Ok(Self { config, ingest })
    }

    /// The shared RTP ingest
    pub fn ingest(&self) -> &RtpIngest {
        &self.ingest
    }
}

#[async_trait]
impl MediaEngineFactory for WebRtcEngineFactory {
    async fn build(&self, events: EngineEventSink) -> Result<Arc<dyn MediaEngine>> {
        let engine = WebRtcEngine::new(&self.config, self.ingest.subscribe(), events).await?;
        Ok(Arc::new(engine))
    }
}
