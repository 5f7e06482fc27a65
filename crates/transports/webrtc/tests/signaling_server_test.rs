//! WebSocket signaling end-to-end tests
//!
//! Run the full bridge (WebSocket server thread, coordination loop, event
//! monitor) against mock engines, with `tokio-tungstenite` as the browser.

mod harness;

use futures_util::{SinkExt, StreamExt};
use harness::{ice_frame, init_test_tracing, sdp_frame, Call, MockFactory, MOCK_ANSWER, MOCK_OFFER};
use rtspcast_webrtc::{BridgeConfig, BridgeHandle, BridgeTransport, ReconnectPolicy, SignalMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_bridge(policy: ReconnectPolicy) -> (BridgeHandle, Arc<MockFactory>) {
    init_test_tracing();
    let config = BridgeConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        reconnect_policy: policy,
        ..Default::default()
    };
    let factory = MockFactory::new();
    let transport = BridgeTransport::new(config).unwrap();
    let handle = tokio_test::assert_ok!(transport.start_with_factory(factory.clone()).await);
    (handle, factory)
}

async fn connect(handle: &BridgeHandle) -> Client {
    let url = format!("ws://{}/ws", handle.local_addr());
    let (ws, _) = tokio::time::timeout(TIMEOUT, connect_async(url))
        .await
        .expect("timed out connecting")
        .expect("WebSocket handshake failed");
    ws
}

/// Next text frame, parsed
async fn next_signal(ws: &mut Client) -> SignalMessage {
    loop {
        let frame = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return SignalMessage::from_json(&text).expect("invalid signaling JSON");
        }
    }
}

/// Wait for the server to close the socket
async fn expect_closed(ws: &mut Client) {
    loop {
        let frame = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("server never closed the socket");
        match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_offer_answer_and_ice_over_websocket() {
    let (handle, factory) = start_bridge(ReconnectPolicy::Rebuild).await;
    let mut ws = connect(&handle).await;

    assert_eq!(
        next_signal(&mut ws).await,
        SignalMessage::Sdp {
            sdp: MOCK_OFFER.to_string()
        }
    );

    ws.send(Message::Text(sdp_frame(MOCK_ANSWER))).await.unwrap();
    ws.send(Message::Text(ice_frame(0, "candidate:1 1 udp 1 10.0.0.9 4000 typ host")))
        .await
        .unwrap();

    let engine = factory.latest();
    wait_until("answer and candidate", || {
        engine.remote_descriptions() == 1 && engine.remote_candidates() == 1
    })
    .await;
    assert!(engine
        .calls()
        .contains(&Call::AddIce(0, "candidate:1 1 udp 1 10.0.0.9 4000 typ host".to_string())));

    // Local candidates trickle out to the browser
    engine
        .sink()
        .local_ice_candidate(rtspcast_webrtc::IceCandidate::new(0, "candidate:local"));
    assert_eq!(
        next_signal(&mut ws).await,
        SignalMessage::Ice {
            sdp_mline_index: 0,
            candidate: "candidate:local".to_string()
        }
    );

    handle.shutdown().await;
    assert!(engine.closed());
}

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let (handle, factory) = start_bridge(ReconnectPolicy::Rebuild).await;

    let mut first = connect(&handle).await;
    assert_eq!(next_signal(&mut first).await.kind(), "sdp");

    let mut second = connect(&handle).await;
    expect_closed(&mut first).await;

    // Rebuild gives the new browser a fresh session and a fresh offer
    assert_eq!(next_signal(&mut second).await.kind(), "sdp");
    assert_eq!(factory.built(), 2);
    assert!(factory.engine(0).closed());
    assert!(handle.signaling().is_connected());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_resume_keeps_negotiated_session_across_reconnect() {
    let (handle, factory) = start_bridge(ReconnectPolicy::Resume).await;

    let mut first = connect(&handle).await;
    assert_eq!(next_signal(&mut first).await.kind(), "sdp");
    first
        .send(Message::Text(sdp_frame(MOCK_ANSWER)))
        .await
        .unwrap();
    let engine = factory.latest();
    wait_until("answer applied", || engine.remote_descriptions() == 1).await;

    first.close(None).await.unwrap();
    wait_until("disconnect", || !handle.signaling().is_connected()).await;

    let mut second = connect(&handle).await;
    wait_until("reattach", || handle.signaling().is_connected()).await;
    // No offer follows; the first frame the browser sees is the probe
    engine
        .sink()
        .local_ice_candidate(rtspcast_webrtc::IceCandidate::new(0, "candidate:probe"));
    assert_eq!(next_signal(&mut second).await.kind(), "ice");
    assert_eq!(factory.built(), 1);
    assert_eq!(factory.total_offers(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_wrong_path_rejected_with_404() {
    let (handle, _factory) = start_bridge(ReconnectPolicy::Rebuild).await;

    let url = format!("ws://{}/not-signaling", handle.local_addr());
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("Expected HTTP 404, got {:?}", other),
        Ok(_) => panic!("Handshake on the wrong path must fail"),
    }
    assert!(!handle.signaling().is_connected());

    handle.shutdown().await;
}
