//! Logger bootstrap.

use crate::config::LoggingConfig;

/// Environment variable overriding the configured filter string.
pub const LOG_ENV: &str = "CAMVIEW_LOG";

/// Initialize env_logger with noise filtering for third-party WebRTC crates.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init(config: &LoggingConfig) {
    let filters = std::env::var(LOG_ENV).unwrap_or_else(|_| config.level.clone());
    let _ = env_logger::Builder::new()
        .parse_filters(&filters)
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .try_init();
}
