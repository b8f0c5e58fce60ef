//! Raw-socket paths: CONNECT tunnels and agent UI relays.

#![allow(clippy::unwrap_used)]

mod common;

use common::Harness;
use shellgate::model::{NewConnectRule, RuleAction};
use shellgate::store::PolicyStore;
use shellgate_proxy::{start, GatewayHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Echo server; returns its address.
async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Read a response head, returning it and the stream positioned after it.
async fn read_response_head(stream: TcpStream) -> (String, BufReader<TcpStream>) {
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.unwrap();
        head.push_str(&line);
        if n == 0 || line == "\r\n" {
            break;
        }
    }
    (head, reader)
}

async fn gateway(h: &Harness) -> GatewayHandle {
    start(h.state.clone()).await.unwrap()
}

async fn connect(handle: &GatewayHandle, request: &str) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", handle.port())).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

#[tokio::test]
async fn denied_tunnel_gets_403_and_tide_without_dialing() {
    let h = Harness::new();
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = target.local_addr().unwrap().port();
    h.store
        .create_rule(NewConnectRule {
            domain: "127.0.0.1".to_string(),
            action: RuleAction::Deny,
            crab_id: None,
            priority: 1,
            note: None,
        })
        .await
        .unwrap();
    let handle = gateway(&h).await;

    let request = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", port);
    let mut stream = connect(&handle, &request).await;
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 403"), "{}", response);
    assert!(response.contains("X-Shellgate: domain blocked by policy"));

    let dialed = tokio::time::timeout(Duration::from_millis(300), target.accept()).await;
    assert!(dialed.is_err(), "denied tunnel reached the target");

    let tides = h.tides().await;
    assert_eq!(tides.len(), 1);
    assert_eq!(tides[0].status_code, Some(403));
    assert_eq!(
        tides[0].target_url.as_deref(),
        Some(format!("127.0.0.1:{}", port).as_str())
    );
    handle.shutdown();
}

#[tokio::test]
async fn allowed_tunnel_relays_bytes_and_lookahead() {
    let h = Harness::new();
    let echo = echo_server().await;
    let handle = gateway(&h).await;

    // The first payload rides in the same write as the CONNECT head.
    let request = format!(
        "CONNECT 127.0.0.1:{} HTTP/1.1\r\nProxy-Authorization: Bearer token-scout\r\n\r\nearly",
        echo.port()
    );
    let (crab, _) = h.agent("scout", None).await;
    let stream = connect(&handle, &request).await;
    let (head, mut reader) = read_response_head(stream).await;
    assert!(head.starts_with("HTTP/1.1 200 Connection Established"), "{}", head);

    let mut early = [0u8; 5];
    reader.read_exact(&mut early).await.unwrap();
    assert_eq!(&early, b"early");

    reader.get_mut().write_all(b"ping").await.unwrap();
    let mut pong = [0u8; 4];
    reader.read_exact(&mut pong).await.unwrap();
    assert_eq!(&pong, b"ping");

    let tides = h.tides().await;
    assert_eq!(tides.len(), 1);
    assert_eq!(tides[0].status_code, Some(200));
    assert_eq!(tides[0].crab_id.as_deref(), Some(crab.id.as_str()));
    handle.shutdown();
}

#[tokio::test]
async fn refused_upstream_is_502() {
    let h = Harness::new();
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let handle = gateway(&h).await;

    let mut stream = connect(&handle, &format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", closed)).await;
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 502"), "{}", response);
    assert_eq!(h.tides().await[0].status_code, Some(502));
    handle.shutdown();
}

/// Fake agent UI: answers the upgrade, then echoes.
async fn ui_server() -> (SocketAddr, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (head, mut reader) = read_response_head(socket).await;
        let _ = tx.send(head);
        reader
            .get_mut()
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        loop {
            let n = reader.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            if reader.get_mut().write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    });
    (addr, rx)
}

fn upgrade_request(name: &str, cookie: Option<&str>) -> String {
    let mut request = format!(
        "GET /agents/{}/ws HTTP/1.1\r\nHost: gateway\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n",
        name
    );
    if let Some(cookie) = cookie {
        request.push_str(&format!("Cookie: {}\r\n", cookie));
    }
    request.push_str("\r\n");
    request
}

#[tokio::test]
async fn websocket_upgrade_relayed_to_agent_ui() {
    let h = Harness::new();
    let (ui, head_rx) = ui_server().await;
    // Agent UIs are addressed by agent name; "localhost" reaches the fake.
    h.agent_with_ui("localhost", ui.port()).await;
    let handle = gateway(&h).await;

    let cookie = h.session_cookie();
    let stream = connect(&handle, &upgrade_request("localhost", Some(&cookie))).await;
    let (head, mut reader) = read_response_head(stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "{}", head);

    let forwarded = head_rx.await.unwrap();
    assert!(forwarded.starts_with("GET /agents/localhost/ws HTTP/1.1"));
    assert!(forwarded.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ=="));

    reader.get_mut().write_all(b"frame").await.unwrap();
    let mut echoed = [0u8; 5];
    reader.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"frame");
    handle.shutdown();
}

#[tokio::test]
async fn websocket_upgrade_requires_session() {
    let h = Harness::new();
    h.agent_with_ui("localhost", 1).await;
    let handle = gateway(&h).await;

    let mut stream = connect(&handle, &upgrade_request("localhost", None)).await;
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 401"), "{}", response);

    let cookie = h.session_cookie();
    let mut stream = connect(&handle, &upgrade_request("ghost", Some(&cookie))).await;
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);
    handle.shutdown();
}

#[tokio::test]
async fn agent_ui_http_relay() {
    use axum::routing::get;
    use axum::Router;

    let h = Harness::new();
    let ui = common::spawn_upstream(Router::new().route(
        "/status",
        get(|headers: axum::http::HeaderMap| async move {
            let cookie = headers
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            ([("x-agent", "ui")], format!("cookie=[{}]", cookie))
        }),
    ))
    .await;
    h.agent_with_ui("localhost", ui.port()).await;
    let handle = gateway(&h).await;

    let cookie = format!("theme=dark; {}", h.session_cookie());
    let request = format!(
        "GET /agents/localhost/status HTTP/1.1\r\nHost: gateway\r\nCookie: {}\r\n\r\n",
        cookie
    );
    let mut stream = connect(&handle, &request).await;
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("x-agent: ui"));
    assert!(response.contains("cookie=[theme=dark]"));

    let request = "GET /agents/localhost/status HTTP/1.1\r\nHost: gateway\r\n\r\n";
    let mut stream = connect(&handle, request).await;
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 401"), "{}", response);
    assert!(response.to_ascii_lowercase().contains("set-cookie: shellgate_session=;"));
    handle.shutdown();
}
