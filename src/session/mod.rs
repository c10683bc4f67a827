//! Viewer session management
//!
//! This module drives one camera-to-browser viewing session:
//! - Status publishing (Loading / Playing / Stopped)
//! - Ordered negotiation against the remote media pipeline
//! - Bidirectional ICE candidate relay
//! - Teardown and release of remote resources

pub mod controller;
pub mod ice;
pub mod negotiation;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::SessionController;
pub use ice::IceRelay;
pub use negotiation::NegotiationPipeline;
pub use status::{StatusSignal, StatusStream, StatusSubscription, VideoStatus};

use crate::media::MediaElement;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Viewer-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerError {
    /// Local peer could not be created
    Peer(String),
    /// Local offer generation failed
    Offer(String),
    /// Local peer rejected the remote answer
    Answer(String),
    /// Connecting to the media server failed
    Connect(String),
    /// A remote element could not be created
    Create { element: MediaElement, reason: String },
    /// The remote endpoint rejected the offer
    Negotiation(String),
    /// Linking, playback or remote candidate gathering failed
    Media(String),
    /// A single candidate could not be forwarded
    Candidate(String),
    /// Releasing a resource failed during teardown
    Release(String),
    /// The negotiation did not finish in time
    Timeout(Duration),
    /// Invalid state transition
    InvalidState(String),
    /// The session this work belonged to is gone
    Cancelled,
}

impl ViewerError {
    pub fn create(element: MediaElement, reason: impl fmt::Display) -> Self {
        ViewerError::Create { element, reason: reason.to_string() }
    }

    /// Fatal errors stop the session; the rest are reported only.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ViewerError::Candidate(_) | ViewerError::Release(_) | ViewerError::Cancelled
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ViewerError::Cancelled)
    }
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerError::Peer(msg) => write!(f, "Local peer error: {}", msg),
            ViewerError::Offer(msg) => write!(f, "Offer error: {}", msg),
            ViewerError::Answer(msg) => write!(f, "Answer error: {}", msg),
            ViewerError::Connect(msg) => write!(f, "Media server connect failed: {}", msg),
            ViewerError::Create { element, reason } => write!(f, "Failed to create {}: {}", element, reason),
            ViewerError::Negotiation(msg) => write!(f, "SDP negotiation failed: {}", msg),
            ViewerError::Media(msg) => write!(f, "Media error: {}", msg),
            ViewerError::Candidate(msg) => write!(f, "ICE candidate error: {}", msg),
            ViewerError::Release(msg) => write!(f, "Release failed: {}", msg),
            ViewerError::Timeout(d) => write!(f, "Negotiation timed out after {} ms", d.as_millis()),
            ViewerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            ViewerError::Cancelled => write!(f, "Session cancelled"),
        }
    }
}

impl Error for ViewerError {}
