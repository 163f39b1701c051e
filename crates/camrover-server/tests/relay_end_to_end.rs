//! End-to-end relay behaviour over real WebSocket connections.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use camrover_relay::{Relay, RelayLimits};
use camrover_server::{RelayServer, ServerConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Peer = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(config: ServerConfig) -> (SocketAddr, Relay) {
    let bound = RelayServer::new(
        config
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0),
    )
    .bind()
    .await
    .expect("bind relay");
    let addr = bound.local_addr();
    let relay = bound.relay().clone();
    tokio::spawn(bound.serve());
    (addr, relay)
}

async fn connect(addr: SocketAddr) -> Peer {
    let (ws, _) = connect_async(format!("ws://{addr}/")).await.expect("ws connect");
    ws
}

async fn wait_for_peers(relay: &Relay, expected: usize) {
    for _ in 0..200 {
        if relay.registry().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} peers, registry has {}",
        relay.registry().len()
    );
}

async fn next_message(peer: &mut Peer) -> Message {
    tokio::time::timeout(Duration::from_secs(2), peer.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("websocket error")
}

async fn next_json(peer: &mut Peer) -> Value {
    match next_message(peer).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("JSON text frame"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

async fn assert_silent(peer: &mut Peer, window: Duration) {
    if let Ok(Some(msg)) = tokio::time::timeout(window, peer.next()).await {
        panic!("expected silence, got {msg:?}");
    }
}

async fn send_text(peer: &mut Peer, text: &str) {
    peer.send(Message::Text(text.to_string().into()))
        .await
        .expect("send text");
}

async fn send_binary(peer: &mut Peer, len: usize) {
    peer.send(Message::Binary(vec![0x5a; len].into()))
        .await
        .expect("send binary");
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .expect("response timed out")
        .expect("read response");
    response
}

#[tokio::test]
async fn motor_command_reaches_other_peer_verbatim() {
    let (addr, relay) = start(ServerConfig::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_peers(&relay, 2).await;

    let record = r#"{"cmd":"motor","action":"forward"}"#;
    send_text(&mut a, record).await;

    match next_message(&mut b).await {
        Message::Text(text) => assert_eq!(text.as_str(), record),
        other => panic!("expected text, got {other:?}"),
    }
    assert_silent(&mut a, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn plain_text_is_still_relayed() {
    let (addr, relay) = start(ServerConfig::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_peers(&relay, 2).await;

    send_text(&mut a, "rover booted").await;
    match next_message(&mut b).await {
        Message::Text(text) => assert_eq!(text.as_str(), "rover booted"),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn audio_burst_forwards_one_pair_after_ack() {
    let limits = RelayLimits::default().with_min_frame_interval(Duration::from_secs(1));
    let (addr, relay) = start(ServerConfig::default().with_limits(limits)).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_peers(&relay, 2).await;

    send_text(&mut a, r#"{"cmd":"start_audio"}"#).await;
    let ack = next_json(&mut a).await;
    assert_eq!(ack["type"], "audio_control");
    assert_eq!(ack["status"], "audio_started");

    send_binary(&mut a, 2000).await;
    send_binary(&mut a, 2000).await;

    let metadata = next_json(&mut b).await;
    assert_eq!(metadata["type"], "audio_metadata");
    assert_eq!(metadata["seq"], 0);
    assert_eq!(metadata["size"], 2000);
    match next_message(&mut b).await {
        Message::Binary(data) => assert_eq!(data.len(), 2000),
        other => panic!("expected binary, got {other:?}"),
    }
    assert_silent(&mut b, Duration::from_millis(300)).await;
    assert_silent(&mut a, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn idle_peer_binary_is_never_forwarded() {
    let (addr, relay) = start(ServerConfig::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_peers(&relay, 2).await;

    send_binary(&mut a, 512).await;
    assert_silent(&mut b, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn oversize_frame_is_dropped_and_peer_survives() {
    let (addr, relay) = start(ServerConfig::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_peers(&relay, 2).await;

    send_text(&mut a, r#"{"cmd":"start_audio"}"#).await;
    next_json(&mut a).await;

    send_binary(&mut a, 2 * 1024 * 1024).await;
    assert_silent(&mut b, Duration::from_millis(300)).await;
    assert_silent(&mut a, Duration::from_millis(50)).await;

    let record = r#"{"cmd":"speed","value":40}"#;
    send_text(&mut a, record).await;
    match next_message(&mut b).await {
        Message::Text(text) => assert_eq!(text.as_str(), record),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn start_and_stop_acks_stay_private() {
    let (addr, relay) = start(ServerConfig::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_peers(&relay, 2).await;

    send_text(&mut a, r#"{"cmd":"start_audio"}"#).await;
    send_text(&mut a, r#"{"cmd":"stop_audio"}"#).await;

    assert_eq!(next_json(&mut a).await["status"], "audio_started");
    assert_eq!(next_json(&mut a).await["status"], "audio_stopped");
    assert_silent(&mut b, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn closing_a_peer_unregisters_it() {
    let (addr, relay) = start(ServerConfig::default()).await;
    let mut a = connect(addr).await;
    let _b = connect(addr).await;
    wait_for_peers(&relay, 2).await;

    a.close(None).await.expect("close");
    wait_for_peers(&relay, 1).await;
}

#[tokio::test]
async fn health_and_status_routes() {
    let config = ServerConfig::default().with_camera_url("http://rover-cam:81/stream");
    let (addr, relay) = start(config).await;
    let _peer = connect(addr).await;
    wait_for_peers(&relay, 1).await;

    let health = http_get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200 OK"));
    assert!(health.ends_with(r#"{"status":"ok"}"#));

    let status = http_get(addr, "/status").await;
    assert!(status.starts_with("HTTP/1.1 200 OK"));
    let body = status.split("\r\n\r\n").nth(1).expect("body");
    let report: Value = serde_json::from_str(body).expect("status JSON");
    assert_eq!(report["connections"], 1);
    assert_eq!(report["camera_url"], "http://rover-cam:81/stream");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (addr, _relay) = start(ServerConfig::default()).await;
    let response = http_get(addr, "/nope").await;
    assert!(response.starts_with("HTTP/1.1 404"));
    assert!(response.contains("Access-Control-Allow-Origin: *"));
}

#[tokio::test]
async fn stalled_peer_is_dropped_without_stalling_others() {
    let limits = RelayLimits::default().with_min_frame_interval(Duration::ZERO);
    let config = ServerConfig::default()
        .with_limits(limits)
        .with_send_timeout(Duration::from_millis(200));
    let (addr, relay) = start(config).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    // Never polled: its socket buffers fill and the relay's writes stall.
    let _stalled = connect(addr).await;
    wait_for_peers(&relay, 3).await;

    send_text(&mut a, r#"{"cmd":"start_audio"}"#).await;
    next_json(&mut a).await;

    let record = r#"{"cmd":"motor","action":"stop"}"#;
    let reader = tokio::spawn(async move {
        loop {
            match next_message(&mut b).await {
                Message::Text(text) if text.as_str() == record => return,
                _ => continue,
            }
        }
    });

    for _ in 0..256 {
        send_binary(&mut a, 128 * 1024).await;
    }
    wait_for_peers(&relay, 2).await;

    send_text(&mut a, record).await;
    tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("healthy peer stopped receiving")
        .expect("reader task");
}

#[tokio::test]
async fn frame_beyond_transport_limit_drops_only_its_sender() {
    let limits = RelayLimits::default().with_max_frame_bytes(1024);
    let (addr, relay) = start(ServerConfig::default().with_limits(limits)).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_peers(&relay, 3).await;

    // Above the frame limit but within the transport ceiling: dropped, peer kept.
    send_text(&mut a, r#"{"cmd":"start_audio"}"#).await;
    next_json(&mut a).await;
    send_binary(&mut a, 4096).await;
    assert_silent(&mut b, Duration::from_millis(200)).await;
    assert_eq!(relay.registry().len(), 3);

    // Beyond the ceiling: the transport refuses it and closes the sender.
    let _ = a.send(Message::Binary(vec![0u8; 128 * 1024].into())).await;
    wait_for_peers(&relay, 2).await;

    let record = r#"{"cmd":"servo","axis":"pan","angle":90}"#;
    send_text(&mut c, record).await;
    match next_message(&mut b).await {
        Message::Text(text) => assert_eq!(text.as_str(), record),
        other => panic!("expected text, got {other:?}"),
    }
}
