//! Configuration types for the negotiation bridge

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Main configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the WebSocket signaling listener binds to
    pub listen_addr: SocketAddr,

    /// The single WebSocket path accepted by the listener (default: /ws)
    pub path: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// What happens to the media session when the browser disconnects
    pub reconnect_policy: ReconnectPolicy,

    /// Media ingest and track settings
    pub media: MediaConfig,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Media ingest and outbound track configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// UDP address receiving H.264 RTP from the upstream RTSP relay
    pub rtp_listen_addr: SocketAddr,

    /// RTP payload type of the H.264 stream (dynamic range 96-127)
    pub payload_type: u8,

    /// RTP clock rate in Hz (90000 for video)
    pub clock_rate: u32,

    /// fmtp line advertised for the H.264 codec
    pub sdp_fmtp_line: String,

    /// Track identifier advertised in the SDP
    pub track_id: String,

    /// Stream identifier advertised in the SDP
    pub stream_id: String,
}

/// Reconnect policy applied when the signaling connection drops
///
/// `Resume` keeps the media session (and a completed negotiation) alive for
/// the next connection. `Rebuild` tears the session down and builds a fresh
/// one, so every new connection negotiates from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Keep the existing media session across reconnects
    Resume,
    /// Tear the media session down and build a new one
    #[default]
    Rebuild,
}

impl std::str::FromStr for ReconnectPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(ReconnectPolicy::Resume),
            "rebuild" => Ok(ReconnectPolicy::Rebuild),
            other => Err(crate::Error::InvalidConfig(format!(
                "reconnect policy must be 'resume' or 'rebuild', got '{}'",
                other
            ))),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/ws".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            reconnect_policy: ReconnectPolicy::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            rtp_listen_addr: SocketAddr::from(([127, 0, 0, 1], 5004)),
            payload_type: 96,
            clock_rate: 90000,
            sdp_fmtp_line:
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                    .to_string(),
            track_id: "video".to_string(),
            stream_id: "rtspcast".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a YAML file
    ///
    /// Missing fields fall back to their defaults. The result is validated.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&text).map_err(|e| match e {
            crate::Error::InvalidConfig(msg) => {
                crate::Error::InvalidConfig(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        Ok(config)
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml_str(text: &str) -> crate::Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `path` does not start with `/`
    /// - `stun_servers` is empty or contains a non-STUN URL
    /// - a TURN URL does not start with `turn:` or `turns:`
    /// - `media.payload_type` is outside 96-127
    /// - `media.clock_rate` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "path must start with '/', got {}",
                self.path
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server URL must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server URL must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if !(96..=127).contains(&self.media.payload_type) {
            return Err(Error::InvalidConfig(format!(
                "payload_type must be in dynamic range 96-127, got {}",
                self.media.payload_type
            )));
        }

        if self.media.clock_rate == 0 {
            return Err(Error::InvalidConfig(
                "clock_rate must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
