//! Capabilities of the external collaborators
//!
//! The viewer core drives two collaborators it does not implement:
//! - the local WebRTC peer (offer generation, answer application, ICE gathering)
//! - the remote media server (pipeline, player and WebRTC endpoints)
//!
//! Both are consumed through the traits below. Remote elements are created
//! through typed factory methods; any dynamic dispatch to the server's object
//! model belongs to the adapter implementing these traits.

pub mod types;
#[cfg(feature = "webrtc-peer")]
pub mod webrtc_peer;

pub use types::{CandidateKind, IceCandidate, SdpType, SessionDescription, VideoSink};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Error type returned across the capability boundary
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stream of ICE candidates; dropping it unsubscribes
pub type CandidateStream = BoxStream<'static, IceCandidate>;

/// Remote element kinds created during negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaElement {
    Pipeline,
    SourceEndpoint,
    WebRtcEndpoint,
}

impl MediaElement {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaElement::Pipeline => "MediaPipeline",
            MediaElement::SourceEndpoint => "PlayerEndpoint",
            MediaElement::WebRtcEndpoint => "WebRtcEndpoint",
        }
    }
}

impl fmt::Display for MediaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates receive-only local peers bound to a video sink
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, sink: &VideoSink) -> Result<Arc<dyn LocalPeer>, BoxError>;
}

/// Local WebRTC peer
#[async_trait]
pub trait LocalPeer: Send + Sync {
    /// Generate the SDP offer
    async fn generate_offer(&self) -> Result<SessionDescription, BoxError>;

    /// Apply the remote answer
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), BoxError>;

    /// Add a candidate signaled by the remote side
    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), BoxError>;

    /// Subscribe to locally discovered candidates.
    ///
    /// Candidates discovered after the call and before the stream is polled
    /// must be queued in the stream, not dropped.
    fn local_candidates(&self) -> CandidateStream;

    /// Release the underlying connection. Idempotent.
    async fn dispose(&self);
}

/// Entry point to the remote media server
#[async_trait]
pub trait MediaServer: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn MediaClient>, BoxError>;
}

/// Connected media-server client
#[async_trait]
pub trait MediaClient: Send + Sync {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, BoxError>;

    /// Close the connection to the server. Idempotent.
    async fn close(&self);
}

/// Remote media pipeline; owns every element created through it
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    fn id(&self) -> &str;

    async fn create_source_endpoint(&self, uri: &str) -> Result<Arc<dyn SourceEndpoint>, BoxError>;

    async fn create_webrtc_endpoint(&self) -> Result<Arc<dyn WebRtcEndpoint>, BoxError>;

    /// Release the pipeline and all of its children. Idempotent.
    async fn release(&self) -> Result<(), BoxError>;
}

/// Player element pulling from the camera URL
#[async_trait]
pub trait SourceEndpoint: Send + Sync {
    fn id(&self) -> &str;

    async fn connect_to(&self, sink: &dyn WebRtcEndpoint) -> Result<(), BoxError>;

    async fn play(&self) -> Result<(), BoxError>;
}

/// Server-side WebRTC endpoint
#[async_trait]
pub trait WebRtcEndpoint: Send + Sync {
    fn id(&self) -> &str;

    async fn process_offer(&self, offer: SessionDescription) -> Result<SessionDescription, BoxError>;

    async fn gather_candidates(&self) -> Result<(), BoxError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), BoxError>;

    /// Subscribe to candidates signaled by the endpoint
    fn remote_candidates(&self) -> CandidateStream;
}
