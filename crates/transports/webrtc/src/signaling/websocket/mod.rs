//! WebSocket signaling server
//!
//! Accepts browser connections on a single path and hands each one to the
//! process-wide [`SignalingChannel`](crate::signaling::SignalingChannel).

mod handler;
mod server;

pub use server::WebSocketServerHandle;
pub use server::WebSocketSignalingServer;
