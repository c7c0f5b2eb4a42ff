use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::config::{ProbeConfig, DEFAULT_PORT};
use crate::types::{ProbeResult, ProbeTarget, UNKNOWN};

/// One request against the reference host, optionally routed to another address.
///
/// Network and protocol failures are folded into an empty `ProbeResult`; only
/// unexpected local faults are returned as `Err`.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: Option<&ProbeTarget>) -> Result<ProbeResult>;
}

/// Why a probe produced no usable body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("tls handshake failed: {0}")]
    Handshake(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("exchange exceeded the i/o deadline")]
    IoTimeout,
    #[error("response exceeded {0} bytes")]
    ResponseTooLarge(usize),
    #[error("response has no header/body separator")]
    MissingSeparator,
    #[error("body is not a JSON object: {0}")]
    InvalidJson(String),
}

/// Tagged result of a single probe, before it is collapsed for the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success {
        body: Map<String, Value>,
        protocol: String,
        elapsed: Duration,
    },
    Failure {
        reason: ProbeFailure,
        /// Only kept when the exchange completed and the body failed to decode.
        elapsed: Option<Duration>,
    },
}

impl ProbeOutcome {
    fn failed(reason: ProbeFailure) -> Self {
        Self::Failure { reason, elapsed: None }
    }
}

impl From<ProbeOutcome> for ProbeResult {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Success { body, protocol, elapsed } => ProbeResult {
                body,
                protocol,
                elapsed_ms: duration_ms(elapsed),
            },
            ProbeOutcome::Failure { elapsed, .. } => ProbeResult {
                elapsed_ms: elapsed.map(duration_ms).unwrap_or(0.0),
                ..ProbeResult::default()
            },
        }
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Probe backed by a real TCP connection wrapped in TLS (native-tls).
pub struct TlsProbe {
    config: ProbeConfig,
    connector: tokio_native_tls::TlsConnector,
}

impl TlsProbe {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self {
            config,
            connector: tokio_native_tls::TlsConnector::from(connector),
        })
    }

    /// Run one probe and keep the tagged outcome.
    ///
    /// - Connects to `target` (or the logical host on 443) within `connect_timeout`.
    /// - Presents the logical host for SNI and `Host` regardless of `target`.
    /// - Reads until the peer closes (at most `max_response_bytes`), then decodes.
    pub async fn probe(&self, target: Option<&ProbeTarget>) -> ProbeOutcome {
        let (addr_host, port) = match target {
            Some(t) => (t.ip.as_str(), t.port),
            None => (self.config.host.as_str(), DEFAULT_PORT),
        };

        let start = Instant::now();
        let tcp = match time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((addr_host, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return ProbeOutcome::failed(ProbeFailure::Connect(e.to_string())),
            Err(_) => return ProbeOutcome::failed(ProbeFailure::ConnectTimeout),
        };

        let exchanged = match self.config.io_timeout {
            Some(deadline) => time::timeout(deadline, self.exchange(tcp))
                .await
                .unwrap_or(Err(ProbeFailure::IoTimeout)),
            None => self.exchange(tcp).await,
        };
        match exchanged {
            Ok(raw) => decode_response(&raw, start.elapsed()),
            Err(reason) => ProbeOutcome::failed(reason),
        }
    }

    /// Handshake, send the request and read everything; the stream is dropped on return.
    async fn exchange(&self, tcp: TcpStream) -> std::result::Result<Vec<u8>, ProbeFailure> {
        let mut tls = self
            .connector
            .connect(&self.config.host, tcp)
            .await
            .map_err(|e| ProbeFailure::Handshake(e.to_string()))?;

        tls.write_all(&self.config.request_bytes())
            .await
            .map_err(|e| ProbeFailure::Io(e.to_string()))?;

        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match tls.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    raw.extend_from_slice(&buf[..n]);
                    if raw.len() > self.config.max_response_bytes {
                        return Err(ProbeFailure::ResponseTooLarge(self.config.max_response_bytes));
                    }
                }
                // Peers often close without close_notify; keep what already arrived.
                Err(e) if !raw.is_empty() => {
                    debug!(error = %e, "treating read error after data as end of response");
                    break;
                }
                Err(e) => return Err(ProbeFailure::Io(e.to_string())),
            }
        }
        Ok(raw)
    }
}

#[async_trait]
impl Probe for TlsProbe {
    async fn check(&self, target: Option<&ProbeTarget>) -> Result<ProbeResult> {
        let outcome = self.probe(target).await;
        if let ProbeOutcome::Failure { reason, .. } = &outcome {
            let via = target
                .map(|t| format!("{}:{}", t.ip, t.port))
                .unwrap_or_else(|| "direct".to_string());
            debug!(host = %self.config.host, %via, %reason, "probe failed");
        }
        Ok(outcome.into())
    }
}

/// Split a raw HTTP response at the first blank line into (headers, body).
pub fn split_response(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (&raw[..i], &raw[i + 4..]))
}

/// Decode a response body as a JSON object.
pub fn parse_body(body: &[u8]) -> std::result::Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Turn a complete raw response into an outcome, given the time the exchange took.
pub fn decode_response(raw: &[u8], elapsed: Duration) -> ProbeOutcome {
    let Some((_headers, body)) = split_response(raw) else {
        return ProbeOutcome::failed(ProbeFailure::MissingSeparator);
    };
    match parse_body(body) {
        Ok(body) => {
            let protocol = body
                .get("httpProtocol")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN)
                .to_string();
            ProbeOutcome::Success { body, protocol, elapsed }
        }
        Err(e) => ProbeOutcome::Failure {
            reason: ProbeFailure::InvalidJson(e.to_string()),
            elapsed: Some(elapsed),
        },
    }
}
