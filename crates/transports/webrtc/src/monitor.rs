//! Event monitor
//!
//! Components report leveled events through a cloneable [`EventMonitor`];
//! a single drain task formats them into `tracing`. Nothing here keeps
//! state, and a `Fatal` report never stops the process.

use crate::session::SessionId;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Severity of a monitor event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorLevel {
    /// Normal progress (session created, negotiation complete)
    Info,
    /// Recoverable failure; the session keeps going
    Warning,
    /// The session or media pipeline cannot continue
    Fatal,
}

impl fmt::Display for MonitorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorLevel::Info => write!(f, "info"),
            MonitorLevel::Warning => write!(f, "warning"),
            MonitorLevel::Fatal => write!(f, "fatal"),
        }
    }
}

/// A reported event
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    /// Severity
    pub level: MonitorLevel,
    /// Reporting component (`engine`, `negotiation`, `lifecycle`, ...)
    pub source: &'static str,
    /// Human-readable description
    pub message: String,
    /// Session the event concerns, if any
    pub session: Option<SessionId>,
    /// Nanosecond timestamp
    pub timestamp_ns: u64,
}

/// Cloneable reporting handle
#[derive(Debug, Clone)]
pub struct EventMonitor {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl EventMonitor {
    /// Create a reporter and the receiver its events arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an event; ignored once the drain has stopped
    pub fn report(
        &self,
        level: MonitorLevel,
        source: &'static str,
        session: Option<SessionId>,
        message: impl Into<String>,
    ) {
        let _ = self.tx.send(MonitorEvent {
            level,
            source,
            message: message.into(),
            session,
            timestamp_ns: current_timestamp_ns(),
        });
    }

    /// Report a [`MonitorLevel::Info`] event
    pub fn info(&self, source: &'static str, session: Option<SessionId>, message: impl Into<String>) {
        self.report(MonitorLevel::Info, source, session, message);
    }

    /// Report a [`MonitorLevel::Warning`] event
    pub fn warning(
        &self,
        source: &'static str,
        session: Option<SessionId>,
        message: impl Into<String>,
    ) {
        self.report(MonitorLevel::Warning, source, session, message);
    }

    /// Report a [`MonitorLevel::Fatal`] event
    pub fn fatal(&self, source: &'static str, session: Option<SessionId>, message: impl Into<String>) {
        self.report(MonitorLevel::Fatal, source, session, message);
    }

    /// Drain events into `tracing` until every reporter is dropped
    pub async fn run(mut rx: mpsc::UnboundedReceiver<MonitorEvent>) {
        while let Some(event) = rx.recv().await {
            log_event(&event);
        }
    }
}

fn log_event(event: &MonitorEvent) {
    let session = event
        .session
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    match event.level {
        MonitorLevel::Info => info!(
            source = event.source,
            session = %session,
            ts = event.timestamp_ns,
            "{}",
            event.message
        ),
        MonitorLevel::Warning => warn!(
            source = event.source,
            session = %session,
            ts = event.timestamp_ns,
            "{}",
            event.message
        ),
        MonitorLevel::Fatal => error!(
            source = event.source,
            session = %session,
            ts = event.timestamp_ns,
            "FATAL: {}",
            event.message
        ),
    }
}

/// Get current timestamp in nanoseconds
pub fn current_timestamp_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
