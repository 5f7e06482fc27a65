//! Per-socket WebSocket handler
//!
//! Bridges one browser socket to the [`SignalingChannel`] slot: inbound text
//! frames are delivered, queued outbound messages are written, and the socket
//! is closed when a newer connection takes the slot.

use crate::signaling::channel::{Attachment, ConnectionId, SignalingChannel};
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Message,
    },
};
use tracing::{debug, info, warn};

/// Handle a single WebSocket connection
///
/// Handshakes on any path other than `path` are refused with 404. Handshake
/// and socket failures come back as [`Error::WebSocketError`](crate::Error::WebSocketError);
/// the slot is released either way.
pub async fn handle_connection(
    stream: TcpStream,
    path: Arc<str>,
    channel: SignalingChannel,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    debug!("New TCP connection from: {}", addr);

    let expected = Arc::clone(&path);
    let check_path = move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() == &*expected {
            return Ok(resp);
        }
        warn!("Rejecting WebSocket upgrade on {} from {}", req.uri().path(), addr);
        let mut err = ErrorResponse::new(Some(format!("No signaling endpoint at {}", req.uri().path())));
        *err.status_mut() = StatusCode::NOT_FOUND;
        Err(err)
    };

    let ws_stream = accept_hdr_async(stream, check_path).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let Attachment { id, mut superseded } = channel.attach(tx);
    let _detach = DetachGuard {
        channel: channel.clone(),
        id,
    };
    info!(connection = %id, "WebSocket signaling connection from {}", addr);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(text) = outbound else {
                    // Slot dropped our sender: replaced
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                ws_tx.send(Message::Text(text)).await?;
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => channel.deliver(id, &text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!(connection = %id, "Ignoring {}-byte binary frame", data.len());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(connection = %id, "WebSocket connection closed by client: {}", addr);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            _ = &mut superseded => {
                info!(connection = %id, "Connection replaced, closing socket to {}", addr);
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

/// Releases the slot however the handler exits, including task cancellation
struct DetachGuard {
    channel: SignalingChannel,
    id: ConnectionId,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.channel.detach(self.id);
    }
}
