//! Error types for the negotiation bridge

use crate::negotiation::NegotiationState;

/// Result type alias using the bridge Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bridging a media engine to a browser peer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message was sent while no signaling connection is active
    #[error("Signaling channel not connected")]
    NotConnected,

    /// Malformed or unexpected inbound signaling message
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Negotiation requested while another one is in flight
    #[error("Negotiation already in progress (state: {0})")]
    NegotiationConflict(NegotiationState),

    /// Media session could not be built or failed irrecoverably
    #[error("Media engine fatal error: {0}")]
    MediaEngineFatal(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if the caller can log this error and carry on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::ProtocolError(_)
                | Error::NegotiationConflict(_)
                | Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::WebSocketError(_)
        )
    }

    /// Check if this error invalidates the current media session
    pub fn is_session_scoped(&self) -> bool {
        matches!(self, Error::MediaEngineFatal(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtcError(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocketError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::NegotiationConflict(NegotiationState::OfferSent);
        assert_eq!(
            err.to_string(),
            "Negotiation already in progress (state: offer-sent)"
        );
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::NotConnected.is_recoverable());
        assert!(Error::ProtocolError("bad frame".to_string()).is_recoverable());
        assert!(Error::NegotiationConflict(NegotiationState::OfferPending).is_recoverable());
        assert!(!Error::MediaEngineFatal("link failed".to_string()).is_recoverable());
        assert!(!Error::InvalidConfig("test".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_is_session_scoped() {
        assert!(Error::MediaEngineFatal("test".to_string()).is_session_scoped());
        assert!(!Error::NotConnected.is_session_scoped());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("port taken"));
    }
}
