//! Lifecycle integration tests against a real listener.
//!
//! Each test binds on an ephemeral port, drives the server through
//! `run_until` with a oneshot in place of the OS signal, and speaks raw
//! HTTP/1.1 over a TCP socket.

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use gatehouse::config::ServerConfig;
use gatehouse::{HostRouter, Server};

fn local_config() -> ServerConfig {
    ServerConfig {
        addr: Some("127.0.0.1:0".to_string()),
        ..ServerConfig::default()
    }
}

async fn send_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn serves_and_dispatches_by_host() {
    let app = Router::new().route("/", get(|| async { "tenant-a" }));
    let server = Server::new(local_config(), HostRouter::new().host("a.test", app));
    let handle = server.handle();

    let (trigger, signal) = tokio::sync::oneshot::channel::<()>();
    let lifecycle = tokio::spawn(server.run_until(async {
        signal.await.ok();
    }));
    let addr = handle.listening().await.expect("server bound");

    let matched = send_request(
        addr,
        "GET / HTTP/1.1\r\nHost: a.test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(matched.contains("200 OK"), "response: {matched}");
    assert!(matched.ends_with("tenant-a"), "response: {matched}");

    let unmatched = send_request(
        addr,
        "GET / HTTP/1.1\r\nHost: nobody.test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(unmatched.contains("403 Forbidden"), "response: {unmatched}");

    trigger.send(()).unwrap();
    lifecycle.await.unwrap().unwrap();
}

#[tokio::test]
async fn drains_in_flight_requests_on_shutdown() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "done"
        }),
    );
    let server = Server::new(local_config(), HostRouter::new().host("default", app));
    let handle = server.handle();

    let (trigger, signal) = tokio::sync::oneshot::channel::<()>();
    let lifecycle = tokio::spawn(server.run_until(async {
        signal.await.ok();
    }));
    let addr = handle.listening().await.expect("server bound");

    let request = tokio::spawn(send_request(
        addr,
        "GET /slow HTTP/1.1\r\nHost: anything\r\nConnection: close\r\n\r\n",
    ));

    // Let the request reach the handler, then signal shutdown while it is
    // still in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.send(()).unwrap();

    // The in-flight request completes well within the drain deadline
    let response = request.await.unwrap();
    assert!(response.contains("200 OK"), "response: {response}");
    assert!(response.ends_with("done"), "response: {response}");

    lifecycle
        .await
        .unwrap()
        .expect("graceful shutdown within deadline");

    // The listener is gone; new connections are refused
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn stalled_header_read_closes_the_connection() {
    let config = ServerConfig {
        read_header_timeout_seconds: 1,
        ..local_config()
    };
    let server = Server::new(config, HostRouter::new().host("a.test", Router::new()));
    let handle = server.handle();

    let (trigger, signal) = tokio::sync::oneshot::channel::<()>();
    let lifecycle = tokio::spawn(server.run_until(async {
        signal.await.ok();
    }));
    let addr = handle.listening().await.expect("server bound");

    // Send a partial request line and stall; the header budget expires and
    // the server hangs up without a response
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: a.te").await.unwrap();
    let mut response = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("connection closed within the header budget");
    // EOF or a reset, never a response
    assert!(matches!(read, Ok(0) | Err(_)), "response: {:?}", response);

    trigger.send(()).unwrap();
    lifecycle.await.unwrap().unwrap();
}

#[tokio::test]
async fn well_known_paths_served_end_to_end() {
    let server = Server::new(
        local_config(),
        HostRouter::new().host("a.test", Router::new()),
    );
    let handle = server.handle();

    let (trigger, signal) = tokio::sync::oneshot::channel::<()>();
    let lifecycle = tokio::spawn(server.run_until(async {
        signal.await.ok();
    }));
    let addr = handle.listening().await.expect("server bound");

    let response = send_request(
        addr,
        "GET /robots.txt HTTP/1.1\r\nHost: nobody.test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.contains("200 OK"), "response: {response}");
    assert!(response.contains("text/plain"), "response: {response}");
    assert!(response.ends_with("Disallow: /"), "response: {response}");

    trigger.send(()).unwrap();
    lifecycle.await.unwrap().unwrap();
}
