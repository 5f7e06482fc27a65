//! Bridge assembly
//!
//! Wires the signaling server, the coordination loop and the event monitor
//! together and hands back a handle to stop them.

#[allow(clippy::module_inception)]
pub mod transport;

pub use transport::{BridgeHandle, BridgeTransport};
