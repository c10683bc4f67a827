//! Values exchanged with the local peer and the media server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SDP role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description, serialized the way browsers do: `{"type": "offer", "sdp": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<&str>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.map(|s| s.to_string()),
            sdp_mline_index,
        }
    }

    /// Transport protocol (`udp`/`tcp`), if the candidate line is well formed
    pub fn transport(&self) -> Option<String> {
        let parts: Vec<&str> = self.fields().collect();
        if parts.len() < 8 {
            return None;
        }
        parts.get(2).map(|v| v.to_ascii_lowercase())
    }

    /// Candidate type from the `typ` attribute
    pub fn kind(&self) -> CandidateKind {
        let parts: Vec<&str> = self.fields().collect();
        parts
            .iter()
            .position(|p| *p == "typ")
            .and_then(|idx| parts.get(idx + 1))
            .map(|typ| CandidateKind::from_typ(typ))
            .unwrap_or(CandidateKind::Unknown)
    }

    fn fields(&self) -> impl Iterator<Item = &str> {
        self.candidate
            .strip_prefix("candidate:")
            .unwrap_or(&self.candidate)
            .split_whitespace()
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.candidate.chars().take(80).collect();
        write!(f, "{} (mid={:?}, mline={:?})", shown, self.sdp_mid, self.sdp_mline_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

impl CandidateKind {
    fn from_typ(typ: &str) -> Self {
        match typ.to_ascii_lowercase().as_str() {
            "host" => CandidateKind::Host,
            "srflx" => CandidateKind::ServerReflexive,
            "prflx" => CandidateKind::PeerReflexive,
            "relay" => CandidateKind::Relay,
            _ => CandidateKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::Host => "host",
            CandidateKind::ServerReflexive => "srflx",
            CandidateKind::PeerReflexive => "prflx",
            CandidateKind::Relay => "relay",
            CandidateKind::Unknown => "unknown",
        }
    }
}

/// Render target for the remote video track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoSink(String);

impl VideoSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
