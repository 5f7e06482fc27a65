//! Session record and identifier

use crate::media::{EngineEventSink, MediaEngine};
use crate::negotiation::NegotiationState;
use crate::signaling::ConnectionId;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Engine is running and can negotiate
    Active,
    /// Engine reported a fatal error; replaced on the next connect
    Unusable,
}

/// One media session: an engine plus its negotiation bookkeeping
///
/// Only the coordination task touches a `Session`, so none of this is
/// synchronized.
pub struct Session {
    id: SessionId,
    engine: Arc<dyn MediaEngine>,
    events: EngineEventSink,
    state: SessionState,
    negotiation: NegotiationState,
    connection: Option<ConnectionId>,
    negotiation_deferred: bool,
    offer_attempt: u64,
    offer_failures: u32,
}

impl Session {
    /// Wrap a freshly built engine
    pub fn new(engine: Arc<dyn MediaEngine>, events: EngineEventSink) -> Self {
        Self {
            id: events.session(),
            engine,
            events,
            state: SessionState::Active,
            negotiation: NegotiationState::Idle,
            connection: None,
            negotiation_deferred: false,
            offer_attempt: 0,
            offer_failures: 0,
        }
    }

    /// Identifier every engine event of this session is tagged with
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The media engine backing this session
    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// Sink the engine reports through; also used for async offer completions
    pub fn events(&self) -> &EngineEventSink {
        &self.events
    }

    /// Lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session can still negotiate
    pub fn is_usable(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Refuse further negotiation until the session is replaced
    pub fn mark_unusable(&mut self) {
        self.state = SessionState::Unusable;
    }

    /// Current negotiation state
    pub fn negotiation(&self) -> NegotiationState {
        self.negotiation
    }

    pub(crate) fn set_negotiation(&mut self, state: NegotiationState) {
        self.negotiation = state;
    }

    /// Connection the session is currently bound to
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Bind to a new browser connection
    ///
    /// A new connection gets a fresh budget of offer retries.
    pub fn bind(&mut self, connection: ConnectionId) {
        self.connection = Some(connection);
        self.offer_failures = 0;
    }

    /// Forget the bound connection
    pub fn unbind(&mut self) {
        self.connection = None;
    }

    /// Whether a negotiation request arrived while no connection was bound
    pub fn negotiation_deferred(&self) -> bool {
        self.negotiation_deferred
    }

    pub(crate) fn set_negotiation_deferred(&mut self, deferred: bool) {
        self.negotiation_deferred = deferred;
    }

    /// Current offer attempt number
    pub fn offer_attempt(&self) -> u64 {
        self.offer_attempt
    }

    /// Start a new offer attempt, superseding any earlier one
    pub(crate) fn next_offer_attempt(&mut self) -> u64 {
        self.offer_attempt += 1;
        self.offer_attempt
    }

    /// Offer attempts that failed since the last bind or successful offer
    pub fn offer_failures(&self) -> u32 {
        self.offer_failures
    }

    pub(crate) fn record_offer_failure(&mut self) {
        self.offer_failures += 1;
    }

    pub(crate) fn clear_offer_failures(&mut self) {
        self.offer_failures = 0;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("negotiation", &self.negotiation)
            .field("connection", &self.connection)
            .field("negotiation_deferred", &self.negotiation_deferred)
            .field("offer_attempt", &self.offer_attempt)
            .field("offer_failures", &self.offer_failures)
            .finish()
    }
}
