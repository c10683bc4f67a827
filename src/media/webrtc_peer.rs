//! Local peer backed by webrtc-rs
//!
//! Receive-only: a single video transceiver in `recvonly` direction. Remote
//! candidates that arrive before the answer is applied are queued and flushed
//! once the remote description is set.

use super::{BoxError, CandidateStream, IceCandidate, LocalPeer, PeerFactory, SessionDescription, VideoSink};
use crate::config::NegotiationConfig;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<IceCandidate>>>>;

/// Creates [`WebRtcPeer`]s with the configured STUN/TURN servers
pub struct WebRtcPeerFactory {
    ice_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(config: &NegotiationConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
        }
    }

    async fn new_connection(&self) -> Result<RTCPeerConnection, BoxError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| format!("Failed to register codecs: {}", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| format!("Failed to register interceptors: {}", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| format!("Failed to create peer connection: {}", e))?;
        Ok(connection)
    }

    /// Concrete form of [`PeerFactory::create`]
    pub async fn create_peer(&self, sink: &VideoSink) -> Result<Arc<WebRtcPeer>, BoxError> {
        let connection = Arc::new(self.new_connection().await?);

        connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| format!("Failed to add video transceiver: {}", e))?;

        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        {
            let subscribers = subscribers.clone();
            connection.on_ice_candidate(Box::new(move |candidate| {
                let subscribers = subscribers.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!("Local ICE gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let candidate =
                                IceCandidate::new(init.candidate, init.sdp_mid.as_deref(), init.sdp_mline_index);
                            subscribers
                                .lock()
                                .retain(|tx| tx.unbounded_send(candidate.clone()).is_ok());
                        }
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));
        }

        {
            let sink = sink.clone();
            connection.on_track(Box::new(move |track, _receiver, _transceiver| {
                let sink = sink.clone();
                Box::pin(async move {
                    info!("Remote {} track attached to '{}'", track.kind(), sink);
                })
            }));
        }

        connection.on_peer_connection_state_change(Box::new(|state| {
            Box::pin(async move {
                debug!("Peer connection state: {}", state);
            })
        }));

        connection.on_ice_connection_state_change(Box::new(|state| {
            Box::pin(async move {
                debug!("ICE connection state: {}", state);
            })
        }));

        let gathered = Arc::new(AtomicBool::new(false));
        {
            let gathered = gathered.clone();
            connection.on_ice_gathering_state_change(Box::new(move |state| {
                gathered.store(state == RTCIceGathererState::Complete, Ordering::SeqCst);
                Box::pin(async move {
                    debug!("ICE gathering state: {}", state);
                })
            }));
        }

        info!("Created receive-only peer for '{}'", sink);
        Ok(Arc::new(WebRtcPeer {
            sink: sink.clone(),
            connection,
            subscribers,
            remote: Mutex::new(RemoteState::default()),
            gathered,
            disposed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, sink: &VideoSink) -> Result<Arc<dyn LocalPeer>, BoxError> {
        let peer = self.create_peer(sink).await?;
        Ok(peer)
    }
}

#[derive(Default)]
struct RemoteState {
    described: bool,
    pending: Vec<RTCIceCandidateInit>,
}

pub struct WebRtcPeer {
    sink: VideoSink,
    connection: Arc<RTCPeerConnection>,
    subscribers: Subscribers,
    remote: Mutex<RemoteState>,
    gathered: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl WebRtcPeer {
    pub fn sink(&self) -> &VideoSink {
        &self.sink
    }

    pub fn pending_candidates(&self) -> usize {
        self.remote.lock().pending.len()
    }

    /// Local ICE gathering has finished
    pub fn is_gathering_complete(&self) -> bool {
        self.gathered.load(Ordering::SeqCst)
    }
}

fn candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: None,
    }
}

#[async_trait]
impl LocalPeer for WebRtcPeer {
    async fn generate_offer(&self) -> Result<SessionDescription, BoxError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| format!("Failed to create offer: {}", e))?;

        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| format!("Failed to set local description: {}", e))?;

        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), BoxError> {
        let answer = RTCSessionDescription::answer(answer.sdp).map_err(|e| format!("Invalid SDP answer: {}", e))?;

        self.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| format!("Failed to set remote description: {}", e))?;

        let pending = {
            let mut remote = self.remote.lock();
            remote.described = true;
            std::mem::take(&mut remote.pending)
        };

        if !pending.is_empty() {
            debug!("Applying {} queued remote candidates", pending.len());
        }
        for init in pending {
            if let Err(e) = self.connection.add_ice_candidate(init).await {
                warn!("Failed to add queued ICE candidate: {}", e);
            }
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), BoxError> {
        let init = candidate_init(candidate);
        {
            let mut remote = self.remote.lock();
            if !remote.described {
                remote.pending.push(init);
                return Ok(());
            }
        }

        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| format!("Failed to add ICE candidate: {}", e))?;
        Ok(())
    }

    fn local_candidates(&self) -> CandidateStream {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx.boxed()
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscribers.lock().clear();
        if let Err(e) = self.connection.close().await {
            warn!("Failed to close peer connection for '{}': {}", self.sink, e);
        }
        info!("Peer for '{}' closed", self.sink);
    }
}
