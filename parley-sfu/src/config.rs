//! SFU Configuration

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Which routing engine backs the session coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// In-process engine without a media plane (signaling only)
    #[default]
    Loopback,
    /// Native mediasoup worker (requires the `mediasoup` feature)
    Mediasoup,
}

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Routing engine implementation
    pub engine: EngineKind,
    /// Local IP the media transports bind to
    pub listen_ip: String,
    /// IP announced to peers in ICE candidates (falls back to `PUBLIC_IP`)
    pub announced_ip: Option<String>,
    /// Lowest RTC port handed out to transports
    pub rtc_min_port: u16,
    /// Highest RTC port handed out to transports
    pub rtc_max_port: u16,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    /// Router media codecs, in the routing engine's capability format
    pub media_codecs: Vec<serde_json::Value>,
    /// Reject explicit transport ids that belong to another connection
    pub enforce_transport_ownership: bool,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Loopback,
            listen_ip: "0.0.0.0".to_string(),
            announced_ip: None,
            rtc_min_port: 10000,
            rtc_max_port: 10100,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            media_codecs: default_media_codecs(),
            enforce_transport_ownership: true,
        }
    }
}

impl SfuConfig {
    /// Announced IP, falling back to the `PUBLIC_IP` environment variable and then loopback
    #[must_use]
    pub fn effective_announced_ip(&self) -> String {
        self.announced_ip
            .clone()
            .filter(|ip| !ip.is_empty())
            .or_else(|| std::env::var("PUBLIC_IP").ok().filter(|ip| !ip.is_empty()))
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Validate the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rtc_min_port > self.rtc_max_port {
            errors.push(format!(
                "sfu.rtc_min_port ({}) must not exceed sfu.rtc_max_port ({})",
                self.rtc_min_port, self.rtc_max_port
            ));
        }
        if !self.enable_udp && !self.enable_tcp {
            errors.push("sfu: at least one of enable_udp / enable_tcp must be set".to_string());
        }
        if self.media_codecs.is_empty() {
            errors.push("sfu.media_codecs must list at least one codec".to_string());
        }
        if self.listen_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("sfu.listen_ip is not an IP address: {}", self.listen_ip));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Opus stereo audio and VP8 video
fn default_media_codecs() -> Vec<serde_json::Value> {
    vec![
        json!({
            "kind": "audio",
            "mimeType": "audio/opus",
            "clockRate": 48000,
            "channels": 2,
            "parameters": {},
            "rtcpFeedback": []
        }),
        json!({
            "kind": "video",
            "mimeType": "video/VP8",
            "clockRate": 90000,
            "parameters": {},
            "rtcpFeedback": []
        }),
    ]
}
