//! RTSPCast server binary entry point
//!
//! Serves WebSocket signaling for one browser at a time and streams the H.264
//! RTP received from an upstream RTSP relay over WebRTC.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: signaling on ws://0.0.0.0:8080/ws, RTP ingest on udp://127.0.0.1:5004
//! cargo run -p rtspcast-server
//!
//! # Feed it from an RTSP camera without re-encoding
//! ffmpeg -rtsp_transport tcp -i rtsp://camera/stream -an -c:v copy \
//!   -f rtp -payload_type 96 rtp://127.0.0.1:5004
//!
//! # Load a YAML config and override individual fields
//! cargo run -p rtspcast-server -- \
//!   --config ./rtspcast.yaml \
//!   --listen 127.0.0.1:9000 \
//!   --reconnect-policy resume
//! ```

use anyhow::Context;
use clap::Parser;
use rtspcast_webrtc::{BridgeConfig, BridgeTransport, ReconnectPolicy};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RTSPCast server
///
/// Bridges an H.264 RTP stream to a single browser over WebRTC.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override its fields
    #[arg(short, long, env = "RTSPCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling listen address
    #[arg(long, env = "RTSPCAST_LISTEN")]
    listen: Option<SocketAddr>,

    /// WebSocket path
    #[arg(long, env = "RTSPCAST_PATH")]
    path: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "RTSPCAST_STUN_SERVERS")]
    stun_servers: Option<Vec<String>>,

    /// UDP address receiving H.264 RTP from the relay
    #[arg(long, env = "RTSPCAST_RTP_LISTEN")]
    rtp_listen: Option<SocketAddr>,

    /// RTP payload type of the H.264 stream
    #[arg(long, env = "RTSPCAST_PAYLOAD_TYPE")]
    payload_type: Option<u8>,

    /// What to do with the media session when the browser disconnects
    #[arg(long, env = "RTSPCAST_RECONNECT_POLICY")]
    reconnect_policy: Option<ReconnectPolicy>,

    /// Log as JSON lines
    #[arg(long, env = "RTSPCAST_LOG_JSON")]
    json: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BridgeConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(path) = self.path {
            config.path = path;
        }
        if let Some(stun_servers) = self.stun_servers {
            config.stun_servers = stun_servers;
        }
        if let Some(rtp_listen) = self.rtp_listen {
            config.media.rtp_listen_addr = rtp_listen;
        }
        if let Some(payload_type) = self.payload_type {
            config.media.payload_type = payload_type;
        }
        if let Some(policy) = self.reconnect_policy {
            config.reconnect_policy = policy;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    // Ctrl+C flips the watch; a second one forces exit
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signalled = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(130);
        }
        eprintln!("Ctrl+C received, shutting down (press again to force)");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("rtspcast-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_rx))
}

async fn async_main(args: Args, mut shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "RTSPCast server starting");

    let config = args.into_config()?;
    info!(
        listen = %config.listen_addr,
        path = %config.path,
        rtp_listen = %config.media.rtp_listen_addr,
        payload_type = config.media.payload_type,
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        reconnect_policy = ?config.reconnect_policy,
        "Configuration loaded"
    );

    let transport = BridgeTransport::new(config)?;
    let handle = transport.start().await?;
    info!(
        "Server running on ws://{}{}. Press Ctrl+C to shutdown.",
        handle.local_addr(),
        transport.config().path
    );

    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    info!("Shutdown signal received, cleaning up...");
    handle.shutdown().await;
    info!("RTSPCast server shut down gracefully");

    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
