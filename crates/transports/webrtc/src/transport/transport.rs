//! Main bridge transport implementation

use crate::{
    config::BridgeConfig,
    media::{MediaEngineFactory, WebRtcEngineFactory},
    monitor::EventMonitor,
    session::SessionLifecycleManager,
    signaling::{SignalingChannel, WebSocketServerHandle, WebSocketSignalingServer},
    Result,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// RTSP-to-WebRTC negotiation bridge
///
/// Serves one browser at a time over the WebSocket signaling endpoint and
/// negotiates a WebRTC session that carries the ingested H.264 stream.
pub struct BridgeTransport {
    config: Arc<BridgeConfig>,
}

impl BridgeTransport {
    /// Create a new bridge
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        info!("Creating bridge transport");

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Transport configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start the bridge with the webrtc-rs media engine
    ///
    /// Binds the RTP ingest and the signaling listener; failing to bind
    /// either is an error.
    pub async fn start(&self) -> Result<BridgeHandle> {
        let factory = WebRtcEngineFactory::bind(Arc::clone(&self.config)).await?;
        info!(
            "RTP ingest bound on udp://{}",
            factory.ingest().local_addr()
        );
        self.start_with_factory(Arc::new(factory)).await
    }

    /// Start the bridge with a caller-supplied media engine factory
    pub async fn start_with_factory(
        &self,
        factory: Arc<dyn MediaEngineFactory>,
    ) -> Result<BridgeHandle> {
        info!("Starting bridge transport");

        let (monitor, monitor_rx) = EventMonitor::channel();
        let monitor_task = tokio::spawn(EventMonitor::run(monitor_rx));

        let (signaling, signaling_rx) = SignalingChannel::new();

        let server = WebSocketSignalingServer::new(
            self.config.listen_addr,
            self.config.path.as_str(),
            signaling.clone(),
        )
        .start()
        .await?;

        let (mut manager, engine_rx) = SessionLifecycleManager::new(
            self.config.reconnect_policy,
            factory,
            signaling.clone(),
            monitor,
        );
        manager.start().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lifecycle = tokio::spawn(manager.run(signaling_rx, engine_rx, shutdown_rx));

        info!(
            "Bridge transport started on ws://{}{}",
            server.local_addr(),
            self.config.path
        );

        Ok(BridgeHandle {
            local_addr: server.local_addr(),
            signaling,
            server,
            lifecycle,
            monitor_task,
            shutdown_tx,
        })
    }
}

/// Running bridge
pub struct BridgeHandle {
    local_addr: SocketAddr,
    signaling: SignalingChannel,
    server: WebSocketServerHandle,
    lifecycle: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl BridgeHandle {
    /// Address the signaling listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The signaling channel the bridge negotiates over
    pub fn signaling(&self) -> &SignalingChannel {
        &self.signaling
    }

    /// Stop the coordination loop, close the engine and stop the server
    pub async fn shutdown(self) {
        info!("Shutting down bridge transport");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.lifecycle.await {
            warn!("Lifecycle task ended abnormally: {}", e);
        }
        self.server.shutdown().await;

        // The monitor drains once the lifecycle manager dropped its reporters
        let _ = self.monitor_task.await;
        info!("Bridge transport stopped");
    }
}
