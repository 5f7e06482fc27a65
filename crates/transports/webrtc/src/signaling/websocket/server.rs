//! WebSocket signaling server
//!
//! The accept loop runs on a dedicated thread with its own tokio runtime, so
//! socket I/O never competes with the coordination loop for the caller's
//! runtime.

use super::handler::handle_connection;
use crate::signaling::SignalingChannel;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info};

/// WebSocket signaling server
pub struct WebSocketSignalingServer {
    addr: SocketAddr,
    path: Arc<str>,
    channel: SignalingChannel,
}

impl WebSocketSignalingServer {
    /// Create a server accepting upgrades on `path` at `addr`
    pub fn new(addr: SocketAddr, path: impl Into<Arc<str>>, channel: SignalingChannel) -> Self {
        Self {
            addr,
            path: path.into(),
            channel,
        }
    }

    /// Start the WebSocket server
    ///
    /// Resolves once the listener is bound (or binding failed). The returned
    /// handle reports the bound address and shuts the server down.
    pub async fn start(self) -> Result<WebSocketServerHandle, std::io::Error> {
        let Self { addr, path, channel } = self;

        let (startup_tx, startup_rx) = oneshot::channel::<Result<SocketAddr, std::io::Error>>();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_tx_clone = shutdown_tx.clone();

        info!("Starting WebSocket signaling server thread for {}", addr);

        let thread_handle = thread::Builder::new()
            .name("ws-signaling".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = startup_tx.send(Err(std::io::Error::other(format!(
                            "Failed to create tokio runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                rt.block_on(async move {
                    let listener = match TcpListener::bind(&addr).await {
                        Ok(l) => l,
                        Err(e) => {
                            error!("Failed to bind WebSocket server to {}: {}", addr, e);
                            let _ = startup_tx.send(Err(e));
                            return;
                        }
                    };

                    let local_addr = match listener.local_addr() {
                        Ok(a) => a,
                        Err(e) => {
                            let _ = startup_tx.send(Err(e));
                            return;
                        }
                    };

                    info!(
                        "WebSocket signaling server listening on ws://{}{}",
                        local_addr, path
                    );
                    let _ = startup_tx.send(Ok(local_addr));

                    let mut shutdown_rx = shutdown_tx_clone.subscribe();

                    loop {
                        tokio::select! {
                            result = listener.accept() => {
                                match result {
                                    Ok((stream, peer_addr)) => {
                                        debug!("Accepted TCP connection from {}", peer_addr);
                                        let path = Arc::clone(&path);
                                        let channel = channel.clone();
                                        tokio::spawn(async move {
                                            if let Err(e) = handle_connection(stream, path, channel).await {
                                                debug!("WebSocket connection from {} ended with error: {}", peer_addr, e);
                                            }
                                        });
                                    }
                                    Err(e) => {
                                        error!("Failed to accept WebSocket connection: {}", e);
                                    }
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                info!("WebSocket signaling server received shutdown signal");
                                break;
                            }
                        }
                    }

                    info!("WebSocket signaling server accept loop exited");
                });
            })?;

        match startup_rx.await {
            Ok(Ok(local_addr)) => Ok(WebSocketServerHandle {
                local_addr,
                thread: Some(thread_handle),
                shutdown_tx,
            }),
            Ok(Err(e)) => {
                error!("WebSocket signaling server failed to start: {}", e);
                Err(e)
            }
            Err(_) => Err(std::io::Error::other(
                "Server startup channel closed unexpectedly",
            )),
        }
    }
}

/// Handle for controlling the WebSocket server
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    thread: Option<thread::JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the server thread to exit
    ///
    /// Dropping the thread's runtime cancels the per-socket tasks, which
    /// detaches any open connection.
    pub async fn shutdown(mut self) {
        info!("Sending shutdown signal to WebSocket server");
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
            info!("WebSocket server thread exited");
        }
    }
}
