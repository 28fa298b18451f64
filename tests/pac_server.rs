//! PAC endpoint behavior over real sockets.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use proxy_supervisor::pac::PacDocumentServer;

mod common;
use common::test_dir;

const LOOPBACK: &str = "127.0.0.1";

fn loopback() -> IpAddr {
    LOOPBACK.parse().unwrap()
}

/// One full request/response exchange; returns (head, body).
async fn fetch(port: u16) -> (String, String) {
    let mut stream = TcpStream::connect((LOOPBACK, port)).await.unwrap();
    stream
        .write_all(b"GET /proxy.pac HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // The server half-closes after the response, so read to EOF.
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let (head, body) = text.split_once("\r\n\r\n").expect("no header terminator");
    (head.to_string(), body.to_string())
}

#[tokio::test]
async fn test_serves_substituted_document() {
    let dir = test_dir("pac-exact");
    let path = dir.join("proxy.pac");
    std::fs::write(&path, "var p = __PROXY__;").unwrap();

    let server = PacDocumentServer::new(&path);
    server.start(loopback(), 29860, 8123).await.unwrap();

    let (head, body) = fetch(29860).await;
    assert_eq!(body, "var p = PROXY 127.0.0.1:8123;;");

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: application/x-ns-proxy-autoconfig"));
    assert!(head.contains(&format!("Content-Length: {}", body.len())));
    assert!(head.contains("Connection: close"));

    server.stop().await;
}

#[tokio::test]
async fn test_reflects_external_edits_without_restart() {
    let dir = test_dir("pac-live-edit");
    let path = dir.join("proxy.pac");
    std::fs::write(&path, "before __PROXY__").unwrap();

    let server = PacDocumentServer::new(&path);
    server.start(loopback(), 29861, 8123).await.unwrap();

    let (_, body) = fetch(29861).await;
    assert!(body.starts_with("before "));

    // The document is read per request, so a rewrite shows up on the
    // very next connection.
    std::fs::write(&path, "after __PROXY__").unwrap();
    let (_, body) = fetch(29861).await;
    assert!(body.starts_with("after "));

    server.stop().await;
}

#[tokio::test]
async fn test_absent_file_serves_embedded_fallback() {
    let dir = test_dir("pac-fallback");
    let server = PacDocumentServer::new(dir.join("missing.pac"));
    server.start(loopback(), 29862, 8123).await.unwrap();

    let (_, body) = fetch(29862).await;
    assert!(body.contains("FindProxyForURL"));
    assert!(!body.contains("__PROXY__"));
    assert!(body.contains("PROXY 127.0.0.1:8123;"));

    server.stop().await;
}

#[tokio::test]
async fn test_stop_then_rebind_same_port() {
    let dir = test_dir("pac-rebind");
    let path = dir.join("proxy.pac");
    std::fs::write(&path, "__PROXY__").unwrap();

    let first = PacDocumentServer::new(&path);
    first.start(loopback(), 29863, 8123).await.unwrap();
    first.stop().await;

    // No lingering bind: a fresh server takes the port immediately.
    let second = PacDocumentServer::new(&path);
    second.start(loopback(), 29863, 9000).await.unwrap();
    let (_, body) = fetch(29863).await;
    assert_eq!(body, "PROXY 127.0.0.1:9000;");

    second.stop().await;
}

#[tokio::test]
async fn test_concurrent_connections_each_get_full_response() {
    let dir = test_dir("pac-concurrent");
    let path = dir.join("proxy.pac");
    std::fs::write(&path, "var p = __PROXY__;").unwrap();

    let server = PacDocumentServer::new(&path);
    server.start(loopback(), 29864, 8123).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        tasks.push(tokio::spawn(fetch(29864)));
    }
    for task in tasks {
        let (_, body) = task.await.unwrap();
        assert_eq!(body, "var p = PROXY 127.0.0.1:8123;;");
    }

    server.stop().await;
}

#[tokio::test]
async fn test_change_notifier_fires_per_disk_event() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let dir = test_dir("pac-notify");
    let path = dir.join("proxy.pac");
    std::fs::write(&path, "v1 __PROXY__").unwrap();

    let server = PacDocumentServer::new(&path);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    server.set_change_notifier(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    server.start(loopback(), 29865, 8123).await.unwrap();

    std::fs::write(&path, "v2 __PROXY__").unwrap();
    assert!(common::wait_until(|| fired.load(Ordering::SeqCst) >= 1).await);

    server.stop().await;
}
