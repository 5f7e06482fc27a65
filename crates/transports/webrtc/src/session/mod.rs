//! Media session ownership
//!
//! A [`Session`] is one browser peer's attachment to the media stream. The
//! [`SessionLifecycleManager`] owns at most one of them and drives it from
//! signaling and engine events.

pub mod lifecycle;
#[allow(clippy::module_inception)]
pub mod session;

pub use lifecycle::SessionLifecycleManager;
pub use session::{Session, SessionId, SessionState};
