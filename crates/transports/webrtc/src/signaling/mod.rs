//! Signaling side channel
//!
//! - [`protocol`] - JSON message types exchanged with the browser
//! - [`channel`] - the single-connection slot the coordination loop talks to
//! - [`websocket`] - WebSocket server feeding the slot

pub mod channel;
pub mod protocol;
pub mod websocket;

pub use channel::{Attachment, ConnectionId, SignalingChannel, SignalingEvent, SignalingEventReceiver};
pub use protocol::SignalMessage;
pub use websocket::{WebSocketServerHandle, WebSocketSignalingServer};
