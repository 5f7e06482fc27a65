//! Session lifecycle management
//!
//! The [`SessionLifecycleManager`] is the coordination loop. It owns the
//! single [`Session`], reacts to signaling connects and disconnects
//! according to the [`ReconnectPolicy`], and routes engine events and
//! inbound messages to the [`NegotiationCoordinator`]. All session state is
//! mutated here, one event at a time.

use super::session::{Session, SessionId};
use crate::config::ReconnectPolicy;
use crate::media::{
    EngineEvent, EngineEventReceiver, EngineEventSink, MediaEngineFactory, TaggedEngineEvent,
};
use crate::monitor::EventMonitor;
use crate::negotiation::{NegotiationCoordinator, NegotiationState};
use crate::signaling::{
    ConnectionId, SignalMessage, SignalingChannel, SignalingEvent, SignalingEventReceiver,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

const SOURCE: &str = "lifecycle";

/// Immediate offer retries on the same connection after a failed attempt
const MAX_OFFER_RETRIES: u32 = 1;

/// Owns the media session and drives it from signaling and engine events
pub struct SessionLifecycleManager {
    policy: ReconnectPolicy,
    factory: Arc<dyn MediaEngineFactory>,
    coordinator: NegotiationCoordinator,
    monitor: EventMonitor,
    engine_tx: mpsc::UnboundedSender<TaggedEngineEvent>,
    session: Option<Session>,
    connection: Option<ConnectionId>,
}

impl SessionLifecycleManager {
    /// Create a manager and the queue its engines report into
    pub fn new(
        policy: ReconnectPolicy,
        factory: Arc<dyn MediaEngineFactory>,
        signaling: SignalingChannel,
        monitor: EventMonitor,
    ) -> (Self, EngineEventReceiver) {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let manager = Self {
            policy,
            factory,
            coordinator: NegotiationCoordinator::new(signaling, monitor.clone()),
            monitor,
            engine_tx,
            session: None,
            connection: None,
        };
        (manager, engine_rx)
    }

    /// What happens to the session when the browser disconnects
    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// The current session, if one could be built
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Connection the manager considers current
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Build the first session so media flows before any browser connects
    pub async fn start(&mut self) {
        if self.session.is_none() {
            self.build_session().await;
        }
    }

    /// Coordination loop
    ///
    /// Runs until `shutdown` flips to `true` (or its sender is dropped), then
    /// closes the active engine.
    pub async fn run(
        mut self,
        mut signaling_rx: SignalingEventReceiver,
        mut engine_rx: EngineEventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(policy = ?self.policy, "Session lifecycle manager running");

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    Some(event) = signaling_rx.recv() => {
                        self.handle_signaling_event(event).await;
                    }
                    Some(event) = engine_rx.recv() => {
                        self.handle_engine_event(event).await;
                    }
                    else => break,
                }
            }
        }

        info!("Session lifecycle manager shutting down");
        self.teardown_session().await;
    }

    /// Handle one signaling event
    pub async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected(id) => self.on_connect(id).await,
            SignalingEvent::Disconnected(id) => self.on_disconnect(id).await,
            SignalingEvent::Message(id, parsed) => self.on_message(id, parsed).await,
        }
    }

    /// Handle one engine event; events from a replaced session are dropped
    pub async fn handle_engine_event(&mut self, tagged: TaggedEngineEvent) {
        let TaggedEngineEvent { session: id, event } = tagged;
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            debug!(session = %id, event = event.name(), "Dropping event from stale session");
            return;
        };

        let mut retry = false;
        let result = match event {
            EngineEvent::NegotiationNeeded => self.coordinator.on_negotiation_needed(session),
            EngineEvent::OfferCreated { attempt, result } => {
                let outcome = self
                    .coordinator
                    .on_offer_created(session, attempt, result)
                    .await;
                retry = outcome.is_err()
                    && session.negotiation_deferred()
                    && (1..=MAX_OFFER_RETRIES).contains(&session.offer_failures());
                outcome
            }
            EngineEvent::LocalIceCandidate(candidate) => {
                self.coordinator.on_local_ice_candidate(session, &candidate)
            }
            EngineEvent::StateChanged(state) => {
                info!(session = %id, "Peer connection state: {}", state);
                self.monitor
                    .info("engine", Some(id), format!("peer connection {}", state));
                Ok(())
            }
            EngineEvent::Error { message, fatal } => {
                if fatal {
                    Err(Error::MediaEngineFatal(message))
                } else {
                    warn!(session = %id, "Media engine error: {}", message);
                    self.monitor.warning("engine", Some(id), message);
                    Ok(())
                }
            }
        };

        self.settle(result);
        if retry {
            self.retry_offer();
        }
    }

    /// Ask for a new offer right away after a failed attempt
    ///
    /// Without a connection the request just stays deferred.
    fn retry_offer(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        info!(
            session = %session.id(),
            failures = session.offer_failures(),
            "Retrying offer"
        );
        let result = self.coordinator.on_negotiation_needed(session);
        self.settle(result);
    }

    #[instrument(skip(self), fields(policy = ?self.policy))]
    async fn on_connect(&mut self, id: ConnectionId) {
        self.connection = Some(id);

        if !self.session.as_ref().is_some_and(Session::is_usable) {
            self.teardown_session().await;
            if !self.build_session().await {
                return;
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.bind(id);
        info!(session = %session.id(), connection = %id, "Session bound to connection");

        let retrigger = session.negotiation() == NegotiationState::Idle
            && (session.negotiation_deferred() || session.engine().ice_gathering_complete());
        if retrigger {
            let result = self.coordinator.on_negotiation_needed(session);
            self.settle(result);
        }
    }

    #[instrument(skip(self), fields(policy = ?self.policy))]
    async fn on_disconnect(&mut self, id: ConnectionId) {
        if self.connection != Some(id) {
            debug!(connection = %id, "Ignoring disconnect of stale connection");
            return;
        }
        self.connection = None;

        match self.policy {
            ReconnectPolicy::Resume => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.unbind();
                if session.negotiation().in_flight() {
                    debug!(
                        session = %session.id(),
                        state = %session.negotiation(),
                        "Resetting in-flight negotiation"
                    );
                    session.set_negotiation(NegotiationState::Idle);
                    session.set_negotiation_deferred(true);
                }
                info!(session = %session.id(), "Keeping session for the next connection");
            }
            ReconnectPolicy::Rebuild => {
                self.teardown_session().await;
                self.build_session().await;
            }
        }
    }

    async fn on_message(&mut self, id: ConnectionId, parsed: Result<SignalMessage>) {
        if self.connection != Some(id) {
            debug!(connection = %id, "Dropping message from stale connection");
            return;
        }

        let message = match parsed {
            Ok(message) => message,
            Err(e) => {
                self.settle(Err(e));
                return;
            }
        };

        let Some(session) = self.session.as_mut() else {
            warn!(connection = %id, kind = message.kind(), "No session available, dropping message");
            return;
        };

        let result = self.coordinator.on_remote_message(session, message).await;
        self.settle(result);
    }

    /// Log the outcome of a coordinator call at the level its error deserves
    fn settle(&mut self, result: Result<()>) {
        let Err(e) = result else {
            return;
        };

        match e {
            Error::NegotiationConflict(state) => {
                debug!("Negotiation skipped, already {}", state);
            }
            Error::NotConnected => {
                debug!("No signaling connection, negotiation deferred");
            }
            e @ Error::ProtocolError(_) => {
                let session = self.session.as_ref().map(Session::id);
                warn!("Ignoring signaling message: {}", e);
                self.monitor.warning("signaling", session, e.to_string());
            }
            e if e.is_session_scoped() => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.is_usable() {
                    session.mark_unusable();
                    error!(session = %session.id(), "Session unusable: {}", e);
                    self.monitor.fatal("engine", Some(session.id()), e.to_string());
                } else {
                    debug!(session = %session.id(), "Session already unusable: {}", e);
                }
            }
            e if e.is_recoverable() => {
                warn!("{}", e);
            }
            e => {
                error!("{}", e);
            }
        }
    }

    /// Build a fresh session; on failure report it and leave no session
    async fn build_session(&mut self) -> bool {
        let id = SessionId::new();
        let events = EngineEventSink::new(id, self.engine_tx.clone());

        match self.factory.build(events.clone()).await {
            Ok(engine) => {
                info!(session = %id, "Media session created");
                self.monitor.info(SOURCE, Some(id), "media session created");
                self.session = Some(Session::new(engine, events));
                true
            }
            Err(e) => {
                error!(session = %id, "Failed to build media session: {}", e);
                self.monitor
                    .fatal(SOURCE, None, format!("no session available: {}", e));
                self.session = None;
                false
            }
        }
    }

    async fn teardown_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        info!(session = %session.id(), "Tearing down media session");
        if let Err(e) = session.engine().close().await {
            warn!(session = %session.id(), "Failed to close media engine: {}", e);
        }
    }
}
