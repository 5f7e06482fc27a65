//! Offer/answer negotiation
//!
//! The [`NegotiationCoordinator`] advances a [`Session`]'s
//! [`NegotiationState`] in response to engine and signaling events. The
//! state check at the start of each transition is the only serialization
//! needed: every call runs on the coordination task, so a second
//! negotiation request while one is in flight is simply refused.
//!
//! ```text
//! Idle --needed--> OfferPending --offer created--> OfferSent --answer--> Negotiated
//!   ^                   |                              |
//!   +-- offer failed ---+------ disconnect (Resume) ---+
//! ```

use crate::media::{IceCandidate, SdpMessage};
use crate::monitor::EventMonitor;
use crate::session::Session;
use crate::signaling::{SignalMessage, SignalingChannel};
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, info};

const SOURCE: &str = "negotiation";

/// Negotiation progress of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No negotiation outstanding
    Idle,
    /// Offer requested from the engine, not yet produced
    OfferPending,
    /// Offer sent to the browser, waiting for the answer
    OfferSent,
    /// Answer applied
    Negotiated,
}

impl NegotiationState {
    /// Whether an offer is outstanding
    pub fn in_flight(&self) -> bool {
        matches!(self, NegotiationState::OfferPending | NegotiationState::OfferSent)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationState::Idle => write!(f, "idle"),
            NegotiationState::OfferPending => write!(f, "offer-pending"),
            NegotiationState::OfferSent => write!(f, "offer-sent"),
            NegotiationState::Negotiated => write!(f, "negotiated"),
        }
    }
}

/// Drives offer/answer exchange between a session's engine and the browser
#[derive(Debug, Clone)]
pub struct NegotiationCoordinator {
    signaling: SignalingChannel,
    monitor: EventMonitor,
}

impl NegotiationCoordinator {
    /// Create a coordinator sending through `signaling` and reporting to `monitor`
    pub fn new(signaling: SignalingChannel, monitor: EventMonitor) -> Self {
        Self { signaling, monitor }
    }

    /// Start a negotiation if the session is idle and a browser is connected
    ///
    /// On success the session is `OfferPending` and the offer is being
    /// created on a spawned task, which posts
    /// [`EngineEvent::OfferCreated`](crate::media::EngineEvent::OfferCreated)
    /// back through the session's event sink.
    ///
    /// # Errors
    ///
    /// - [`Error::NegotiationConflict`] if a negotiation is already in flight
    ///   or done; nothing changes
    /// - [`Error::NotConnected`] if no browser is connected; the request is
    ///   recorded as deferred and retried on the next connect
    /// - [`Error::MediaEngineFatal`] if the session is unusable
    pub fn on_negotiation_needed(&self, session: &mut Session) -> Result<()> {
        if !session.is_usable() {
            return Err(Error::MediaEngineFatal(format!(
                "session {} is unusable",
                session.id()
            )));
        }

        let state = session.negotiation();
        if state != NegotiationState::Idle {
            return Err(Error::NegotiationConflict(state));
        }

        if !self.signaling.is_connected() {
            session.set_negotiation_deferred(true);
            return Err(Error::NotConnected);
        }

        session.set_negotiation_deferred(false);
        session.set_negotiation(NegotiationState::OfferPending);
        let attempt = session.next_offer_attempt();

        debug!(session = %session.id(), attempt, "Creating offer");

        let engine = session.engine().clone();
        let sink = session.events().clone();
        tokio::spawn(async move {
            let result = engine.create_offer().await;
            sink.offer_created(attempt, result);
        });

        Ok(())
    }

    /// Apply a created offer locally and send it to the browser
    ///
    /// Completions for an older attempt, or arriving when the session is no
    /// longer `OfferPending`, are dropped. If the offer cannot be created or
    /// applied locally the session returns to `Idle` with the request
    /// deferred, so the next connect offers again.
    pub async fn on_offer_created(
        &self,
        session: &mut Session,
        attempt: u64,
        result: Result<SdpMessage>,
    ) -> Result<()> {
        if session.negotiation() != NegotiationState::OfferPending
            || attempt != session.offer_attempt()
        {
            debug!(
                session = %session.id(),
                attempt,
                current = session.offer_attempt(),
                state = %session.negotiation(),
                "Dropping superseded offer"
            );
            return Ok(());
        }

        let offer = match result {
            Ok(offer) => offer,
            Err(e) => return Err(self.offer_failed(session, "create offer", e)),
        };

        let engine = session.engine().clone();
        if let Err(e) = engine.set_local_description(&offer).await {
            return Err(self.offer_failed(session, "set local description", e));
        }

        session.set_negotiation(NegotiationState::OfferSent);

        if let Err(e) = self.signaling.send(&SignalMessage::sdp(&offer)) {
            // Connection dropped between request and completion; re-offer on reconnect
            session.set_negotiation(NegotiationState::Idle);
            session.set_negotiation_deferred(true);
            return Err(e);
        }

        session.clear_offer_failures();
        info!(session = %session.id(), attempt, bytes = offer.body().len(), "Sent SDP offer");
        Ok(())
    }

    fn offer_failed(&self, session: &mut Session, step: &str, e: Error) -> Error {
        session.set_negotiation(NegotiationState::Idle);
        session.set_negotiation_deferred(true);
        session.record_offer_failure();
        self.monitor
            .warning(SOURCE, Some(session.id()), format!("Failed to {}: {}", step, e));
        e
    }

    /// Handle a parsed inbound signaling message
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolError`] for an SDP that is not a valid answer to an
    ///   outstanding offer
    /// - engine errors from applying the answer (state stays `OfferSent`) or
    ///   adding the candidate
    pub async fn on_remote_message(&self, session: &mut Session, message: SignalMessage) -> Result<()> {
        if !session.is_usable() {
            return Err(Error::MediaEngineFatal(format!(
                "session {} is unusable",
                session.id()
            )));
        }

        match message {
            SignalMessage::Sdp { sdp } => {
                let state = session.negotiation();
                if state != NegotiationState::OfferSent {
                    return Err(Error::ProtocolError(format!(
                        "unexpected SDP answer in state {}",
                        state
                    )));
                }

                let answer = SdpMessage::parse_answer(sdp)?;
                let engine = session.engine().clone();
                if let Err(e) = engine.set_remote_description(&answer).await {
                    self.monitor.warning(
                        SOURCE,
                        Some(session.id()),
                        format!("Failed to apply SDP answer: {}", e),
                    );
                    return Err(e);
                }

                session.set_negotiation(NegotiationState::Negotiated);
                info!(session = %session.id(), "Negotiation complete");
                self.monitor
                    .info(SOURCE, Some(session.id()), "negotiation complete");
                Ok(())
            }
            SignalMessage::Ice {
                sdp_mline_index,
                candidate,
            } => {
                let candidate = IceCandidate::new(sdp_mline_index, candidate);
                let engine = session.engine().clone();
                engine.add_remote_ice_candidate(&candidate).await?;
                debug!(session = %session.id(), mline = sdp_mline_index, "Added remote ICE candidate");
                Ok(())
            }
        }
    }

    /// Forward a locally gathered candidate; dropped when nobody is connected
    pub fn on_local_ice_candidate(&self, session: &Session, candidate: &IceCandidate) -> Result<()> {
        match self.signaling.send(&SignalMessage::ice(candidate)) {
            Ok(()) => Ok(()),
            Err(Error::NotConnected) => {
                debug!(session = %session.id(), "No connection, dropping local ICE candidate");
                Err(Error::NotConnected)
            }
            Err(e) => Err(e),
        }
    }
}
