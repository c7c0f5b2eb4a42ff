use std::net::SocketAddr;
use std::time::{Duration, Instant};

use proxyip_check::config::ProbeConfig;
use proxyip_check::probe::{Probe, ProbeFailure, ProbeOutcome, TlsProbe};
use proxyip_check::types::{ProbeResult, ProbeTarget};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const CERT: &[u8] = include_bytes!("fixtures/localhost.crt");
const KEY: &[u8] = include_bytes!("fixtures/localhost.key");

fn local_probe() -> TlsProbe {
    let config = ProbeConfig::default()
        .with_host("localhost")
        .with_connect_timeout(Duration::from_secs(2))
        .accept_invalid_certs(true);
    TlsProbe::new(config).unwrap()
}

fn target(addr: SocketAddr) -> ProbeTarget {
    ProbeTarget::new(addr.ip().to_string(), addr.port())
}

/// Accept one TLS connection, answer with `response` and return the request that was read.
async fn serve_tls_once(
    response: impl AsRef<[u8]> + Send + 'static,
) -> (SocketAddr, JoinHandle<String>) {
    let identity = native_tls::Identity::from_pkcs8(CERT, KEY).unwrap();
    let acceptor =
        tokio_native_tls::TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(stream).await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 512];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = tls.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        // The client may hang up early on oversized responses.
        let _ = tls.write_all(response.as_ref()).await;
        let _ = tls.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });
    (addr, handle)
}

#[tokio::test]
async fn routed_probe_reads_json_and_presents_logical_host() {
    let (addr, server) = serve_tls_once(
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{\"clientIp\":\"203.0.113.4\",\"httpProtocol\":\"HTTP/1.1\",\"colo\":\"FRA\"}",
    )
    .await;

    let result = local_probe().check(Some(&target(addr))).await.unwrap();
    assert_eq!(result.body["clientIp"], "203.0.113.4");
    assert_eq!(result.body["colo"], "FRA");
    assert_eq!(result.protocol, "HTTP/1.1");
    assert!(result.elapsed_ms > 0.0);

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /meta HTTP/1.1\r\n"));
    assert!(request.contains("\r\nHost: localhost\r\n"));
    assert!(request.contains("\r\nConnection: close\r\n"));
}

#[tokio::test]
async fn invalid_json_keeps_timing() {
    let (addr, server) = serve_tls_once(b"HTTP/1.1 403 Forbidden\r\n\r\n<html>denied</html>").await;

    let result = local_probe().check(Some(&target(addr))).await.unwrap();
    assert!(result.body.is_empty());
    assert_eq!(result.protocol, "Unknown");
    assert!(result.elapsed_ms > 0.0);
    server.await.unwrap();
}

#[tokio::test]
async fn response_without_separator_fails() {
    let (addr, server) = serve_tls_once(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n").await;

    let outcome = local_probe().probe(Some(&target(addr))).await;
    assert_eq!(
        outcome,
        ProbeOutcome::Failure { reason: ProbeFailure::MissingSeparator, elapsed: None }
    );
    server.await.unwrap();
}

#[tokio::test]
async fn refused_connection_is_empty_result() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = local_probe().probe(Some(&target(addr))).await;
    assert!(matches!(
        outcome,
        ProbeOutcome::Failure { reason: ProbeFailure::Connect(_), elapsed: None }
    ));
    assert_eq!(ProbeResult::from(outcome), ProbeResult::default());
}

#[tokio::test]
async fn plain_tcp_peer_fails_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
    });

    let result = local_probe().check(Some(&target(addr))).await.unwrap();
    assert_eq!(result, ProbeResult::default());
}

#[tokio::test]
async fn io_deadline_bounds_silent_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let probe = TlsProbe::new(
        ProbeConfig::default()
            .with_host("localhost")
            .with_io_timeout(Some(Duration::from_millis(200)))
            .accept_invalid_certs(true),
    )
    .unwrap();

    let started = Instant::now();
    let outcome = probe.probe(Some(&target(addr))).await;
    assert_eq!(
        outcome,
        ProbeOutcome::Failure { reason: ProbeFailure::IoTimeout, elapsed: None }
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn routed_handshake_sends_logical_host_as_sni() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hello = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut buf = [0u8; 2048];
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            while !seen.windows(20).any(|w| w == b"speed.cloudflare.com") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
        })
        .await;
        seen
    });

    let probe = TlsProbe::new(
        ProbeConfig::default()
            .with_host("speed.cloudflare.com")
            .with_connect_timeout(Duration::from_secs(2)),
    )
    .unwrap();
    let outcome = probe.probe(Some(&target(addr))).await;
    assert!(matches!(
        outcome,
        ProbeOutcome::Failure { reason: ProbeFailure::Handshake(_), elapsed: None }
    ));

    let client_hello = hello.await.unwrap();
    assert_eq!(client_hello.first(), Some(&0x16), "expected a TLS handshake record");
    assert!(client_hello.windows(20).any(|w| w == b"speed.cloudflare.com"));
}

#[tokio::test]
async fn connect_past_deadline_is_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // A zero deadline elapses before the connect can be observed as complete.
    let probe = TlsProbe::new(
        ProbeConfig::default()
            .with_host("localhost")
            .with_connect_timeout(Duration::ZERO),
    )
    .unwrap();
    let outcome = probe.probe(Some(&target(addr))).await;
    assert_eq!(
        outcome,
        ProbeOutcome::Failure { reason: ProbeFailure::ConnectTimeout, elapsed: None }
    );
    assert_eq!(ProbeResult::from(outcome), ProbeResult::default());
    drop(listener);
}

#[tokio::test]
async fn oversized_response_is_cut_off() {
    let mut response = b"HTTP/1.1 200 OK\r\n\r\n".to_vec();
    response.resize(8 * 1024, b' ');
    let (addr, server) = serve_tls_once(response).await;

    let probe = TlsProbe::new(
        ProbeConfig::default()
            .with_host("localhost")
            .with_max_response_bytes(1024)
            .accept_invalid_certs(true),
    )
    .unwrap();
    let outcome = probe.probe(Some(&target(addr))).await;
    assert_eq!(
        outcome,
        ProbeOutcome::Failure { reason: ProbeFailure::ResponseTooLarge(1024), elapsed: None }
    );
    server.await.unwrap();
}
