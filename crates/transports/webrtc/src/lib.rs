//! RTSP-to-WebRTC negotiation bridge
//!
//! This crate streams an H.264 RTSP source to a browser over WebRTC. The
//! media arrives as RTP from an upstream relay; this crate owns the
//! negotiation: offer/answer and trickle ICE over a WebSocket side channel,
//! with one browser connected at a time.
//!
//! # Features
//!
//! - **Single-slot signaling**: a new browser connection replaces the old one
//! - **Guarded negotiation**: at most one offer in flight per session
//! - **Reconnect policies**: resume the media session or rebuild it
//! - **Session isolation**: late events from a replaced session are dropped
//! - **Event monitor**: leveled engine/session events routed into `tracing`
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Browser (WebSocket JSON + WebRTC)                     │
//! │  ↓                                                     │
//! │  WebSocketSignalingServer (own thread + runtime)       │
//! │  └─ SignalingChannel (one connection slot)             │
//! │     ↓ SignalingEvent                                   │
//! │  SessionLifecycleManager (coordination task)           │
//! │  ├─ NegotiationCoordinator (offer/answer/ICE)          │
//! │  └─ Session ── MediaEngine (webrtc-rs peer)            │
//! │                 ↑ EngineEvent      ↑ RTP               │
//! │  EventMonitor   │                RtpIngest (UDP)       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rtspcast_webrtc::{BridgeConfig, ReconnectPolicy};
//!
//! let config = BridgeConfig {
//!     path: "/signal".to_string(),
//!     reconnect_policy: ReconnectPolicy::Resume,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.media.payload_type, 96);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use rtspcast_webrtc::{BridgeConfig, BridgeTransport};
//!
//! # async fn example() -> rtspcast_webrtc::Result<()> {
//! let transport = BridgeTransport::new(BridgeConfig::default())?;
//! let handle = transport.start().await?;
//! println!("signaling on ws://{}/ws", handle.local_addr());
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod monitor;
pub mod negotiation;
pub mod session;
pub mod signaling;
mod transport;

pub use config::{BridgeConfig, MediaConfig, ReconnectPolicy, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{
    EngineEvent, EngineEventSink, IceCandidate, MediaEngine, MediaEngineFactory, SdpKind,
    SdpMessage, TaggedEngineEvent,
};
pub use monitor::{EventMonitor, MonitorEvent, MonitorLevel};
pub use negotiation::{NegotiationCoordinator, NegotiationState};
pub use session::{Session, SessionId, SessionLifecycleManager, SessionState};
pub use signaling::{ConnectionId, SignalMessage, SignalingChannel, SignalingEvent};
pub use transport::{BridgeHandle, BridgeTransport};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
