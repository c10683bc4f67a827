//! Configuration management for camview

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Viewer configuration
    #[serde(default)]
    pub viewer: ViewerConfig,

    /// Negotiation configuration
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to play and where to negotiate it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// URL of the camera stream the media server pulls from
    pub camera_url: String,

    /// WebSocket URL of the media server
    pub signaling_url: String,

    /// Label of the render target receiving remote video
    #[serde(default = "default_video_sink")]
    pub video_sink: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            camera_url: String::new(),
            signaling_url: "ws://127.0.0.1:8888/kurento".to_string(),
            video_sink: default_video_sink(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Overall negotiation deadline in ms (0 disables it)
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// STUN/TURN URLs handed to the local peer
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

impl NegotiationConfig {
    pub fn deadline(&self) -> Option<Duration> {
        if self.deadline_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.deadline_ms))
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            ice_servers: default_ice_servers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.viewer.validate()?;

        for url in &self.negotiation.ice_servers {
            if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
                return Err(format!("ICE server URL must use stun:, turn: or turns: ({})", url).into());
            }
        }

        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(format!("Unknown log level: {}", self.logging.level).into());
        }

        Ok(())
    }
}

impl ViewerConfig {
    pub fn new(camera_url: &str, signaling_url: &str, video_sink: &str) -> Self {
        Self {
            camera_url: camera_url.to_string(),
            signaling_url: signaling_url.to_string(),
            video_sink: video_sink.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.camera_url.trim().is_empty() {
            return Err("Viewer camera_url must not be empty".into());
        }

        if !self.camera_url.contains("://") {
            return Err("Viewer camera_url must include a scheme (e.g. rtsp://)".into());
        }

        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err("Viewer signaling_url must be a ws:// or wss:// URL".into());
        }

        if self.video_sink.trim().is_empty() {
            return Err("Viewer video_sink must not be empty".into());
        }

        Ok(())
    }
}

fn default_video_sink() -> String {
    "remote-video".to_string()
}

fn default_deadline_ms() -> u64 { 30_000 }

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}
