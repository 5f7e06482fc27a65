//! Scriptable media engine for negotiation tests
//!
//! Records every call the coordinator makes so tests can assert on exact
//! call counts and arguments.

use async_trait::async_trait;
use parking_lot::Mutex;
use rtspcast_webrtc::{
    EngineEventSink, Error, IceCandidate, MediaEngine, MediaEngineFactory, Result, SdpMessage,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Offer body every mock engine produces
pub const MOCK_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// Answer body tests send back
pub const MOCK_ANSWER: &str = "v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// A call made on a [`MockEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOffer,
    SetLocal(String),
    SetRemote(String),
    AddIce(u32, String),
    Close,
}

/// Media engine that records calls and succeeds unless told otherwise
pub struct MockEngine {
    sink: EngineEventSink,
    calls: Mutex<Vec<Call>>,
    pub fail_create_offer: AtomicBool,
    /// Fail this many upcoming offers, then succeed
    pub failing_offers: AtomicUsize,
    pub fail_set_remote: AtomicBool,
    pub gathering_complete: AtomicBool,
}

impl MockEngine {
    fn new(sink: EngineEventSink) -> Self {
        Self {
            sink,
            calls: Mutex::new(Vec::new()),
            fail_create_offer: AtomicBool::new(false),
            failing_offers: AtomicUsize::new(0),
            fail_set_remote: AtomicBool::new(false),
            gathering_complete: AtomicBool::new(false),
        }
    }

    /// The sink this engine reports through, to inject engine events
    pub fn sink(&self) -> &EngineEventSink {
        &self.sink
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn offers_created(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateOffer))
    }

    pub fn remote_descriptions(&self) -> usize {
        self.count(|c| matches!(c, Call::SetRemote(_)))
    }

    pub fn remote_candidates(&self) -> usize {
        self.count(|c| matches!(c, Call::AddIce(..)))
    }

    pub fn closed(&self) -> bool {
        self.count(|c| matches!(c, Call::Close)) > 0
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_offer(&self) -> Result<SdpMessage> {
        self.record(Call::CreateOffer);
        let fail_once = self
            .failing_offers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_once || self.fail_create_offer.load(Ordering::SeqCst) {
            return Err(Error::SdpError("mock offer failure".to_string()));
        }
        Ok(SdpMessage::offer(MOCK_OFFER))
    }

    async fn set_local_description(&self, sdp: &SdpMessage) -> Result<()> {
        self.record(Call::SetLocal(sdp.body().to_string()));
        Ok(())
    }

    async fn set_remote_description(&self, sdp: &SdpMessage) -> Result<()> {
        self.record(Call::SetRemote(sdp.body().to_string()));
        if self.fail_set_remote.load(Ordering::SeqCst) {
            return Err(Error::SdpError("mock answer rejected".to_string()));
        }
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.record(Call::AddIce(
            candidate.mline_index(),
            candidate.candidate().to_string(),
        ));
        Ok(())
    }

    fn ice_gathering_complete(&self) -> bool {
        self.gathering_complete.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}

/// Factory handing out [`MockEngine`]s and remembering each one
///
/// Like a real peer connection with a track attached, every new engine
/// immediately reports that negotiation is needed.
#[derive(Default)]
pub struct MockFactory {
    engines: Mutex<Vec<Arc<MockEngine>>>,
    pub fail_next: AtomicBool,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of engines built so far
    pub fn built(&self) -> usize {
        self.engines.lock().len()
    }

    /// The `index`-th engine built
    pub fn engine(&self, index: usize) -> Arc<MockEngine> {
        Arc::clone(&self.engines.lock()[index])
    }

    /// The most recently built engine
    pub fn latest(&self) -> Arc<MockEngine> {
        let engines = self.engines.lock();
        Arc::clone(engines.last().expect("no engine built yet"))
    }

    /// Offers created across every engine
    pub fn total_offers(&self) -> usize {
        self.engines.lock().iter().map(|e| e.offers_created()).sum()
    }
}

#[async_trait]
impl MediaEngineFactory for MockFactory {
    async fn build(&self, events: EngineEventSink) -> Result<Arc<dyn MediaEngine>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::MediaEngineFatal(
                "mock: failed to link video track".to_string(),
            ));
        }
        let engine = Arc::new(MockEngine::new(events.clone()));
        self.engines.lock().push(Arc::clone(&engine));
        events.negotiation_needed();
        Ok(engine)
    }
}
