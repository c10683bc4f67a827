//! camview - camera-to-browser viewer core
//!
//! Negotiates a receive-only WebRTC session between a local peer and a
//! remote media pipeline server that pulls from a camera URL.

pub mod config;
pub mod logging;
pub mod media;
pub mod session;

// Re-exports
pub use config::{Config, LoggingConfig, NegotiationConfig, ViewerConfig};
pub use media::{IceCandidate, MediaServer, PeerFactory, SessionDescription, VideoSink};
pub use session::{SessionController, VideoStatus, ViewerError};
