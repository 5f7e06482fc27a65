//! UDP RTP ingest
//!
//! Receives already-packetized H.264 RTP (the output of the upstream RTSP
//! depay/repay step) and fans each datagram out to every subscribed engine.
//! The socket outlives individual media sessions, so rebuilding a session
//! never has to rebind the port.

use crate::Result;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest datagram accepted from the relay
///
/// The receive buffer is one byte larger, so a datagram that fills it was
/// truncated by the socket and is dropped.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Minimum RTP fixed header length
const RTP_HEADER_LEN: usize = 12;

/// Packets buffered per subscriber before it starts lagging
const FANOUT_CAPACITY: usize = 512;

/// UDP RTP source shared by all media sessions
pub struct RtpIngest {
    local_addr: SocketAddr,
    tx: broadcast::Sender<Bytes>,
    task: JoinHandle<()>,
}

impl RtpIngest {
    /// Bind the ingest socket and start receiving
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);

        info!("RTP ingest listening on udp://{}", local_addr);

        let fanout = tx.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
            let mut dropped: u64 = 0;
            loop {
                let (n, from) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("RTP ingest receive error: {}", e);
                        continue;
                    }
                };

                if !accept(&buf[..n]) {
                    dropped += 1;
                    if dropped.is_power_of_two() {
                        debug!(
                            "Dropped {} oversized or non-RTP datagrams (latest {} bytes from {})",
                            dropped, n, from
                        );
                    }
                    continue;
                }

                // No subscriber means no active session; drop the packet
                let _ = fanout.send(Bytes::copy_from_slice(&buf[..n]));
            }
        });

        Ok(Self {
            local_addr,
            tx,
            task,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to the packet stream
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }
}

impl Drop for RtpIngest {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whether a received datagram is forwarded to the engines
fn accept(datagram: &[u8]) -> bool {
    datagram.len() <= MAX_DATAGRAM_SIZE && is_rtp(datagram)
}

/// Check the RTP fixed header: long enough and version 2
fn is_rtp(packet: &[u8]) -> bool {
    packet.len() >= RTP_HEADER_LEN && packet[0] >> 6 == 2
}
