//! Media engine abstraction
//!
//! The negotiation core never talks to webrtc-rs directly. It sees a
//! [`MediaEngine`] (mutating calls) and a stream of [`EngineEvent`]s tagged
//! with the [`SessionId`] of the session that produced them.
//!
//! # Overview
//!
//! - [`SdpMessage`] / [`IceCandidate`] - immutable negotiation payloads
//! - [`MediaEngine`] - create offer, apply descriptions, add remote ICE
//! - [`MediaEngineFactory`] - builds one engine per session
//! - [`EngineEventSink`] - handed to each engine; posts events to the event loop
//! - [`WebRtcEngine`] / [`WebRtcEngineFactory`] - webrtc-rs implementation
//! - [`RtpIngest`] - UDP RTP source feeding the outbound video track

mod engine;
mod rtp_ingest;

pub use engine::{WebRtcEngine, WebRtcEngineFactory};
pub use rtp_ingest::RtpIngest;

use crate::session::SessionId;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Direction of an SDP description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    /// Local offer produced by the media engine
    Offer,
    /// Remote answer received from the browser
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// An SDP description, immutable once constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpMessage {
    kind: SdpKind,
    body: String,
}

impl SdpMessage {
    /// Wrap an SDP offer produced by the media engine
    pub fn offer(body: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            body: body.into(),
        }
    }

    /// Wrap an SDP answer received from the browser
    pub fn answer(body: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            body: body.into(),
        }
    }

    /// Parse a remote answer body, rejecting text that is not an SDP session
    ///
    /// Only the leading version line is checked here; the engine performs the
    /// full parse when the description is applied.
    pub fn parse_answer(body: impl Into<String>) -> Result<Self> {
        let body = body.into();
        if !body.trim_start().starts_with("v=") {
            return Err(crate::Error::ProtocolError(
                "SDP answer must start with a v= line".to_string(),
            ));
        }
        Ok(Self::answer(body))
    }

    /// Offer or answer
    pub fn kind(&self) -> SdpKind {
        self.kind
    }

    /// Raw SDP text
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// An ICE candidate, routed between peers without modification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    mline_index: u32,
    candidate: String,
}

impl IceCandidate {
    /// Create a candidate for the given media line
    pub fn new(mline_index: u32, candidate: impl Into<String>) -> Self {
        Self {
            mline_index,
            candidate: candidate.into(),
        }
    }

    /// SDP media line index the candidate belongs to
    pub fn mline_index(&self) -> u32 {
        self.mline_index
    }

    /// Candidate attribute string (`candidate:...`), empty for end-of-candidates
    pub fn candidate(&self) -> &str {
        &self.candidate
    }
}

/// Events a media engine reports back to the coordination loop
#[derive(Debug)]
pub enum EngineEvent {
    /// The session description is stale and an offer should be created
    NegotiationNeeded,

    /// An async offer creation completed
    OfferCreated {
        /// Offer attempt the result belongs to
        attempt: u64,
        /// The offer, or why it could not be created
        result: Result<SdpMessage>,
    },

    /// A local ICE candidate was gathered
    LocalIceCandidate(IceCandidate),

    /// Peer connection state transition, for monitoring
    StateChanged(String),

    /// Engine error; `fatal` errors make the session unusable
    Error {
        /// Human-readable description
        message: String,
        /// Whether the session can keep running
        fatal: bool,
    },
}

impl EngineEvent {
    /// Get the event name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::NegotiationNeeded => "negotiation_needed",
            Self::OfferCreated { .. } => "offer_created",
            Self::LocalIceCandidate(_) => "local_ice_candidate",
            Self::StateChanged(_) => "state_changed",
            Self::Error { .. } => "error",
        }
    }
}

/// An engine event stamped with the session that produced it
#[derive(Debug)]
pub struct TaggedEngineEvent {
    /// Session the event belongs to
    pub session: SessionId,
    /// The event itself
    pub event: EngineEvent,
}

/// Receiving half of the engine event queue, drained by the coordination loop
pub type EngineEventReceiver = mpsc::UnboundedReceiver<TaggedEngineEvent>;

/// Thread-safe handle an engine uses to report events
///
/// Sending never blocks, so it is safe from webrtc-rs callbacks. Events sent
/// after the coordination loop stopped are discarded.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<TaggedEngineEvent>,
}

impl EngineEventSink {
    /// Create a sink stamping every event with `session`
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<TaggedEngineEvent>) -> Self {
        Self { session, tx }
    }

    /// Session this sink reports for
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Post an arbitrary event
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(TaggedEngineEvent {
            session: self.session,
            event,
        });
    }

    /// Report that negotiation is needed
    pub fn negotiation_needed(&self) {
        self.emit(EngineEvent::NegotiationNeeded);
    }

    /// Report the outcome of an offer attempt
    pub fn offer_created(&self, attempt: u64, result: Result<SdpMessage>) {
        self.emit(EngineEvent::OfferCreated { attempt, result });
    }

    /// Report a locally gathered ICE candidate
    pub fn local_ice_candidate(&self, candidate: IceCandidate) {
        self.emit(EngineEvent::LocalIceCandidate(candidate));
    }

    /// Report a state transition
    pub fn state_changed(&self, state: impl Into<String>) {
        self.emit(EngineEvent::StateChanged(state.into()));
    }

    /// Report an engine error
    pub fn error(&self, message: impl Into<String>, fatal: bool) {
        self.emit(EngineEvent::Error {
            message: message.into(),
            fatal,
        });
    }
}

/// The operations the negotiation core needs from a media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a local SDP offer
    async fn create_offer(&self) -> Result<SdpMessage>;

    /// Apply a local description (the offer just created)
    async fn set_local_description(&self, sdp: &SdpMessage) -> Result<()>;

    /// Apply the remote description (the browser's answer)
    async fn set_remote_description(&self, sdp: &SdpMessage) -> Result<()>;

    /// Add an ICE candidate received from the browser
    async fn add_remote_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Whether local ICE gathering has completed
    fn ice_gathering_complete(&self) -> bool;

    /// Release the engine's resources
    async fn close(&self) -> Result<()>;
}

/// Builds one media engine per session
#[async_trait]
pub trait MediaEngineFactory: Send + Sync {
    /// Construct an engine reporting its events through `events`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MediaEngineFatal`] when the engine cannot be
    /// assembled (codec registration, track linking, peer connection).
    async fn build(&self, events: EngineEventSink) -> Result<Arc<dyn MediaEngine>>;
}
