#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)] // Integration tests use unwrap for brevity

//! WebSocket gateway end-to-end: real HTTP server, real WebSocket client,
//! real engine subprocesses.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};

use enginehub_core::{EngineFamily, RouteTable};
use enginehub_daemon::server::{EngineServer, ServerConfig};
use enginehub_daemon::session::{SessionRegistry, SessionSettings};

struct Harness {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

async fn start_server(max_sessions: usize) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = common::fake_engine(dir.path());
    let routes = RouteTable::new(vec![
        EngineFamily::new("fake", "fake", engine.display().to_string())
            .with_display_name("Fake"),
        EngineFamily::new("tuned", "tuned", engine.display().to_string())
            .with_handshake(["setoption name Elo value {variant}"]),
        EngineFamily::new("broken", "broken", "/nonexistent/engine-{variant}"),
    ]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let settings = SessionSettings {
        poll_interval: Duration::from_millis(50),
        quit_grace: Duration::from_millis(500),
        ..SessionSettings::default()
    };
    let config = ServerConfig::tcp(addr)
        .with_max_sessions(max_sessions)
        .with_session_settings(settings);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let server = EngineServer::new(config, routes, shutdown_rx.clone());
    let registry = Arc::clone(server.registry());
    let mut stop = shutdown_rx;
    tokio::spawn(server.serve_listener(listener, async move {
        let _ = stop.wait_for(|s| *s).await;
    }));

    Harness {
        addr,
        registry,
        shutdown,
        _dir: dir,
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, route: &str) -> Socket {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/{route}"))
        .await
        .unwrap();
    socket
}

async fn next_text(socket: &mut Socket) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        match message {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

async fn wait_for_total(registry: &SessionRegistry, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while registry.total() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry total stuck at {}",
            registry.total()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn websocket_session_relays_engine_lines() {
    let harness = start_server(0).await;
    let mut socket = connect(harness.addr, "fake-1").await;

    socket.send(Message::Text("uci".into())).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "id name fake");
    assert_eq!(next_text(&mut socket).await, "uciok");
    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "pong");

    assert_eq!(harness.registry.total(), 1);
    assert_eq!(harness.registry.count("fake"), Some(1));

    socket.close(None).await.unwrap();
    wait_for_total(&harness.registry, 0).await;
    assert_eq!(harness.registry.count("fake"), Some(0));
}

#[tokio::test]
async fn route_variant_reaches_handshake() {
    let harness = start_server(0).await;
    let mut socket = connect(harness.addr, "tuned-2100").await;

    assert_eq!(
        next_text(&mut socket).await,
        "echo:setoption name Elo value 2100"
    );
    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn unknown_route_is_refused_before_spawning() {
    let harness = start_server(0).await;
    let err = tokio_tungstenite::connect_async(format!("ws://{}/leela-1", harness.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(harness.registry.total(), 0);
}

#[tokio::test]
async fn full_server_refuses_new_sessions() {
    let harness = start_server(1).await;
    let mut first = connect(harness.addr, "fake-1").await;
    first.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut first).await, "pong");

    let err = tokio_tungstenite::connect_async(format!("ws://{}/fake-2", harness.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 503),
        other => panic!("unexpected error: {other:?}"),
    }

    first.close(None).await.unwrap();
    wait_for_total(&harness.registry, 0).await;
    let mut second = connect(harness.addr, "fake-2").await;
    second.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut second).await, "pong");
}

#[tokio::test]
async fn spawn_failure_closes_the_connection() {
    let harness = start_server(0).await;
    let mut socket = connect(harness.addr, "broken-1").await;

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap();
    match frame {
        Some(Ok(Message::Close(Some(close)))) => assert_eq!(close.reason, "engine unavailable"),
        Some(Ok(Message::Close(None))) | None | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("unexpected frame: {other:?}"),
    }
    wait_for_total(&harness.registry, 0).await;
}

#[tokio::test]
async fn engine_exit_closes_the_connection() {
    let harness = start_server(0).await;
    let mut socket = connect(harness.addr, "fake-1").await;
    socket.send(Message::Text("quit".into())).await.unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
        {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }
    wait_for_total(&harness.registry, 0).await;
}

#[tokio::test]
async fn status_endpoints_report_counts() {
    let harness = start_server(0).await;
    let mut socket = connect(harness.addr, "fake-1").await;
    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "pong");

    let (status, body) = http_get(harness.addr, "/status").await;
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["categories"][0]["name"], "fake");
    assert_eq!(json["categories"][0]["active"], 1);

    let (status, html) = http_get(harness.addr, "/").await;
    assert_eq!(status, 200);
    assert!(html.contains("<span id=\"total-users\">1</span>"));
    assert!(html.contains("Fake Users"));

    let (status, body) = http_get(harness.addr, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body, "ok");

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn host_shutdown_closes_live_sessions() {
    let harness = start_server(0).await;
    let mut socket = connect(harness.addr, "fake-1").await;
    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "pong");

    harness.shutdown.send(true).unwrap();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
        {
            Some(Ok(Message::Close(frame))) => {
                if let Some(frame) = frame {
                    assert_eq!(frame.reason, "server shutting down");
                }
                break;
            }
            None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }
    wait_for_total(&harness.registry, 0).await;
}
