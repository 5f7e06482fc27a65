//! Shared test harness
//!
//! [`Fixture`] owns a [`SessionLifecycleManager`] wired to mock engines and
//! pumps its event queues by hand, so each test controls exactly which
//! events are processed and in what order. [`Browser`] stands in for a
//! WebSocket peer attached straight to the signaling slot.

#![allow(dead_code)]

pub mod engine;

pub use engine::{Call, MockEngine, MockFactory, MOCK_ANSWER, MOCK_OFFER};

use rtspcast_webrtc::media::EngineEventReceiver;
use rtspcast_webrtc::signaling::{Attachment, SignalingEventReceiver};
use rtspcast_webrtc::{
    ConnectionId, EventMonitor, MediaEngineFactory, MonitorEvent, MonitorLevel, NegotiationState,
    ReconnectPolicy, SessionLifecycleManager, SignalMessage, SignalingChannel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Consecutive idle yields before the queues count as drained
const QUIET_YIELDS: usize = 8;

/// Initialize tracing for tests
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

/// A simulated browser attached to the signaling slot
pub struct Browser {
    pub id: ConnectionId,
    outbound: mpsc::UnboundedReceiver<String>,
    pub superseded: oneshot::Receiver<()>,
}

impl Browser {
    /// Every message sent to this browser so far
    pub fn received(&mut self) -> Vec<SignalMessage> {
        let mut out = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            out.push(SignalMessage::from_json(&text).expect("bridge sent invalid JSON"));
        }
        out
    }

    /// Wait for the next message sent to this browser
    pub async fn next_message(&mut self) -> SignalMessage {
        let text = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for a signaling message")
            .expect("outbound queue closed");
        SignalMessage::from_json(&text).expect("bridge sent invalid JSON")
    }
}

/// Count SDP messages in a batch
pub fn sdp_count(messages: &[SignalMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, SignalMessage::Sdp { .. }))
        .count()
}

/// Count ICE messages in a batch
pub fn ice_count(messages: &[SignalMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, SignalMessage::Ice { .. }))
        .count()
}

/// Lifecycle manager under test plus its queues
pub struct Fixture {
    pub manager: SessionLifecycleManager,
    pub signaling: SignalingChannel,
    pub factory: Arc<MockFactory>,
    signaling_rx: SignalingEventReceiver,
    engine_rx: EngineEventReceiver,
    monitor_rx: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl Fixture {
    /// Build a started manager (first session built eagerly)
    pub async fn new(policy: ReconnectPolicy) -> Self {
        Self::with_factory(policy, MockFactory::new()).await
    }

    pub async fn with_factory(policy: ReconnectPolicy, factory: Arc<MockFactory>) -> Self {
        init_test_tracing();
        let (monitor, monitor_rx) = EventMonitor::channel();
        let (signaling, signaling_rx) = SignalingChannel::new();
        let engines: Arc<dyn MediaEngineFactory> = factory.clone();
        let (mut manager, engine_rx) = SessionLifecycleManager::new(
            policy,
            engines,
            signaling.clone(),
            monitor,
        );
        manager.start().await;

        Self {
            manager,
            signaling,
            factory,
            signaling_rx,
            engine_rx,
            monitor_rx,
        }
    }

    /// Attach a browser (the Connected event is queued, not yet handled)
    pub fn attach(&self) -> Browser {
        let (tx, outbound) = mpsc::unbounded_channel();
        let Attachment { id, superseded } = self.signaling.attach(tx);
        Browser {
            id,
            outbound,
            superseded,
        }
    }

    /// Attach a browser and process everything that follows
    pub async fn connect(&mut self) -> Browser {
        let browser = self.attach();
        self.drain().await;
        browser
    }

    /// Detach a browser and process everything that follows
    pub async fn disconnect(&mut self, browser: &Browser) {
        self.signaling.detach(browser.id);
        self.drain().await;
    }

    /// Deliver a raw text frame from a browser and process everything that follows
    pub async fn send_from(&mut self, browser: &Browser, text: &str) {
        self.signaling.deliver(browser.id, text);
        self.drain().await;
    }

    /// Handle queued events until both queues stay empty
    ///
    /// Signaling events go first, mirroring the biased loop. Yielding lets
    /// spawned offer tasks post their completions.
    pub async fn drain(&mut self) {
        let mut quiet = 0;
        while quiet < QUIET_YIELDS {
            if let Ok(event) = self.signaling_rx.try_recv() {
                self.manager.handle_signaling_event(event).await;
                quiet = 0;
            } else if let Ok(event) = self.engine_rx.try_recv() {
                self.manager.handle_engine_event(event).await;
                quiet = 0;
            } else {
                quiet += 1;
                tokio::task::yield_now().await;
            }
        }
    }

    /// Wait for exactly one engine event and handle it
    pub async fn pump_engine(&mut self) {
        let event = tokio::time::timeout(Duration::from_secs(1), self.engine_rx.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("engine event queue closed");
        self.manager.handle_engine_event(event).await;
    }

    /// Hand the manager and its queues to a test that runs the real loop
    pub fn into_parts(
        self,
    ) -> (
        SessionLifecycleManager,
        SignalingEventReceiver,
        EngineEventReceiver,
    ) {
        (self.manager, self.signaling_rx, self.engine_rx)
    }

    /// Handle only the already-queued signaling events
    pub async fn drain_signaling(&mut self) {
        while let Ok(event) = self.signaling_rx.try_recv() {
            self.manager.handle_signaling_event(event).await;
        }
    }

    /// Negotiation state of the current session
    pub fn state(&self) -> NegotiationState {
        self.manager
            .session()
            .expect("no session available")
            .negotiation()
    }

    /// Monitor events reported so far
    pub fn monitor_events(&mut self) -> Vec<MonitorEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.monitor_rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Monitor events of one level reported so far
    pub fn monitor_level(&mut self, level: MonitorLevel) -> Vec<MonitorEvent> {
        self.monitor_events()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    /// Connect a browser and complete a full offer/answer exchange
    pub async fn negotiate(&mut self) -> Browser {
        let mut browser = self.connect().await;
        let offers = sdp_count(&browser.received());
        assert_eq!(offers, 1, "expected exactly one offer on connect");
        let answer = SignalMessage::Sdp {
            sdp: MOCK_ANSWER.to_string(),
        }
        .to_json()
        .unwrap();
        self.send_from(&browser, &answer).await;
        assert_eq!(self.state(), NegotiationState::Negotiated);
        browser
    }
}

/// JSON for an `sdp` message carrying `body`
pub fn sdp_frame(body: &str) -> String {
    SignalMessage::Sdp {
        sdp: body.to_string(),
    }
    .to_json()
    .unwrap()
}

/// JSON for an `ice` message
pub fn ice_frame(mline: u32, candidate: &str) -> String {
    SignalMessage::Ice {
        sdp_mline_index: mline,
        candidate: candidate.to_string(),
    }
    .to_json()
    .unwrap()
}
