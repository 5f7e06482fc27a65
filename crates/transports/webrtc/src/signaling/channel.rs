//! Single-slot signaling channel
//!
//! Holds at most one browser connection. The WebSocket handler attaches,
//! delivers frames and detaches; the coordination loop consumes the
//! resulting [`SignalingEvent`]s and sends through [`SignalingChannel::send`].
//! Attaching while occupied replaces the previous connection instead of
//! queueing behind it.

use super::protocol::SignalMessage;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Monotonic identifier of a transport-level connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the coordination loop hears from the channel
#[derive(Debug)]
pub enum SignalingEvent {
    /// A connection became current
    Connected(ConnectionId),
    /// The given connection stopped being current
    Disconnected(ConnectionId),
    /// An inbound frame from the current connection, parsed
    Message(ConnectionId, Result<SignalMessage>),
}

/// Receiving half of the signaling event queue
pub type SignalingEventReceiver = mpsc::UnboundedReceiver<SignalingEvent>;

/// Returned by [`SignalingChannel::attach`]
#[derive(Debug)]
pub struct Attachment {
    /// Identifier assigned to the new connection
    pub id: ConnectionId,
    /// Fires when a newer connection replaces this one
    pub superseded: oneshot::Receiver<()>,
}

struct Slot {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    superseded: Option<oneshot::Sender<()>>,
}

struct Inner {
    slot: Mutex<Option<Slot>>,
    next_id: AtomicU64,
    events: mpsc::UnboundedSender<SignalingEvent>,
}

/// Process-wide signaling channel; clones share the same slot
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<Inner>,
}

impl SignalingChannel {
    /// Create a channel and the receiver its events arrive on
    pub fn new() -> (Self, SignalingEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let channel = Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                next_id: AtomicU64::new(1),
                events,
            }),
        };
        (channel, rx)
    }

    /// Install a new connection, replacing any current one
    ///
    /// The replaced connection's `Disconnected` is emitted before the new
    /// `Connected`, both while the slot is locked so no other transition can
    /// interleave.
    pub fn attach(&self, outbound: mpsc::UnboundedSender<String>) -> Attachment {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (superseded_tx, superseded_rx) = oneshot::channel();

        let mut slot = self.inner.slot.lock();
        if let Some(mut old) = slot.take() {
            info!(connection = %old.id, replaced_by = %id, "Replacing signaling connection");
            if let Some(tx) = old.superseded.take() {
                let _ = tx.send(());
            }
            let _ = self.inner.events.send(SignalingEvent::Disconnected(old.id));
        }
        *slot = Some(Slot {
            id,
            outbound,
            superseded: Some(superseded_tx),
        });
        let _ = self.inner.events.send(SignalingEvent::Connected(id));
        drop(slot);

        info!(connection = %id, "Signaling connection attached");
        Attachment {
            id,
            superseded: superseded_rx,
        }
    }

    /// Remove `id` if it is still current
    ///
    /// A connection that was already replaced has had its `Disconnected`
    /// emitted by [`attach`](Self::attach), so this is then a no-op.
    pub fn detach(&self, id: ConnectionId) {
        let mut slot = self.inner.slot.lock();
        if slot.as_ref().map(|s| s.id) != Some(id) {
            debug!(connection = %id, "Ignoring detach of stale connection");
            return;
        }
        *slot = None;
        let _ = self.inner.events.send(SignalingEvent::Disconnected(id));
        drop(slot);

        info!(connection = %id, "Signaling connection detached");
    }

    /// Parse an inbound text frame from `id` and queue it
    ///
    /// Frames from a connection that is no longer current are dropped.
    pub fn deliver(&self, id: ConnectionId, text: &str) {
        let slot = self.inner.slot.lock();
        if slot.as_ref().map(|s| s.id) != Some(id) {
            debug!(connection = %id, "Dropping frame from stale connection");
            return;
        }
        let parsed = SignalMessage::from_json(text);
        let _ = self.inner.events.send(SignalingEvent::Message(id, parsed));
    }

    /// Send a message over the current connection
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when no connection is attached.
    pub fn send(&self, message: &SignalMessage) -> Result<()> {
        let json = message.to_json()?;
        let slot = self.inner.slot.lock();
        let Some(current) = slot.as_ref() else {
            return Err(Error::NotConnected);
        };
        current
            .outbound
            .send(json)
            .map_err(|_| Error::NotConnected)?;
        debug!(connection = %current.id, kind = message.kind(), "Sent signaling message");
        Ok(())
    }

    /// Whether a connection is attached
    pub fn is_connected(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    /// Identifier of the current connection
    pub fn current(&self) -> Option<ConnectionId> {
        self.inner.slot.lock().as_ref().map(|s| s.id)
    }
}

impl fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("current", &self.current())
            .finish()
    }
}
