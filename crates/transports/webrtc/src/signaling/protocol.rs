//! JSON signaling protocol types
//!
//! Two message kinds travel over the WebSocket as text frames:
//!
//! ```json
//! {"type":"sdp","sdp":"v=0\r\n..."}
//! {"type":"ice","sdpMLineIndex":0,"candidate":"candidate:..."}
//! ```

use crate::media::{IceCandidate, SdpMessage};
use serde::{Deserialize, Serialize};

/// A signaling message exchanged with the browser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Session description (outbound offer, inbound answer)
    #[serde(alias = "offer", alias = "answer")]
    Sdp {
        /// Raw SDP text
        sdp: String,
    },

    /// Trickled ICE candidate
    Ice {
        /// Media line index the candidate belongs to
        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: u32,
        /// Candidate attribute string
        candidate: String,
    },
}

impl SignalMessage {
    /// Build an `sdp` message from a local description
    pub fn sdp(sdp: &SdpMessage) -> Self {
        SignalMessage::Sdp {
            sdp: sdp.body().to_owned(),
        }
    }

    /// Build an `ice` message from a local candidate
    pub fn ice(candidate: &IceCandidate) -> Self {
        SignalMessage::Ice {
            sdp_mline_index: candidate.mline_index(),
            candidate: candidate.candidate().to_owned(),
        }
    }

    /// Message type as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Sdp { .. } => "sdp",
            SignalMessage::Ice { .. } => "ice",
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize signaling message: {}", e))
        })
    }

    /// Parse an inbound text frame
    ///
    /// Invalid JSON, an unknown `type` and missing or mistyped fields are all
    /// reported as [`crate::Error::ProtocolError`].
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::ProtocolError(format!("Failed to parse signaling message: {}", e))
        })
    }
}
