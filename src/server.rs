use std::num::IntErrorKind;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{classifier, config::DEFAULT_PORT, probe::Probe, types::Verdict};

#[derive(Clone)]
pub struct AppState {
    probe: Arc<dyn Probe>,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub proxyip: Option<String>,
}

/// Ways a `proxyip` value can be rejected before any probing happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyIpError {
    Missing,
    InvalidFormat,
    InvalidPort,
    PortOutOfRange,
}

impl ProxyIpError {
    pub fn body(self) -> Value {
        match self {
            Self::Missing => json!({
                "error": "Parameter 'proxyip' must be provided in the URL.",
                "example": "/api/v1/check?proxyip=1.1.1.1:443 or /api/v1/check?proxyip=8.8.8.8",
            }),
            Self::InvalidFormat => json!({
                "error": "Invalid 'proxyip' format.",
                "expected_format": "IP:PORT",
            }),
            Self::InvalidPort => json!({ "error": "Port must be a number." }),
            Self::PortOutOfRange => json!({ "error": "Port must be between 0 and 65535." }),
        }
    }
}

/// Split `IP[:PORT]` into its parts. Segments after the second `:` are ignored.
pub fn parse_proxyip(raw: &str) -> std::result::Result<(String, u16), ProxyIpError> {
    let mut parts = raw.split(':');
    let ip = parts.next().unwrap_or_default();
    if ip.is_empty() {
        return Err(ProxyIpError::InvalidFormat);
    }
    let port = match parts.next() {
        Some(p) => p.trim().parse::<u16>().map_err(|e| match e.kind() {
            IntErrorKind::PosOverflow => ProxyIpError::PortOutOfRange,
            _ => ProxyIpError::InvalidPort,
        })?,
        None => DEFAULT_PORT,
    };
    Ok((ip.to_string(), port))
}

/// JSON body reported for a classified candidate.
pub fn verdict_body(ip: &str, port: u16, verdict: &Verdict) -> Value {
    if verdict.alive {
        json!({
            "ip": ip,
            "port": port,
            "proxyip": true,
            "asOrganization": verdict.org_name,
            "countryCode": verdict.country_code,
            "countryName": verdict.country_name,
            "countryFlag": verdict.country_flag,
            "asn": verdict.asn,
            "colo": verdict.colo,
            "httpProtocol": verdict.protocol,
            "ping": format!("{} ms", verdict.elapsed_ms.round_ties_even() as i64),
            "latitude": verdict.latitude,
            "longitude": verdict.longitude,
            "message": verdict.message,
        })
    } else {
        json!({
            "ip": ip,
            "port": port,
            "proxyip": false,
            "asn": verdict.asn,
            "message": verdict.message,
        })
    }
}

/// Validate `proxyip`, classify it and build the status and body the endpoint answers with.
pub async fn run_check(probe: &dyn Probe, proxyip: Option<&str>) -> (StatusCode, Value) {
    let parsed = proxyip
        .ok_or(ProxyIpError::Missing)
        .and_then(parse_proxyip);
    let (ip, port) = match parsed {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, e.body()),
    };

    match classifier::process_proxy(probe, &ip, port).await {
        Ok(verdict) => (StatusCode::OK, verdict_body(&ip, port, &verdict)),
        Err(e) => {
            let message = format!(
                "An internal server error occurred while processing the proxy {ip}:{port}: {e:#}"
            );
            error!("{message}");
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
        }
    }
}

pub fn router(probe: Arc<dyn Probe>) -> Router {
    let state = AppState { probe };

    let api = Router::new()
        .route("/check", get(get_check))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `bind` until `shutdown` is cancelled.
pub async fn spawn_server(bind: &str, probe: Arc<dyn Probe>, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving proxy checker");
    axum::serve(listener, router(probe))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn get_check(State(app): State<AppState>, Query(q): Query<CheckQuery>) -> impl IntoResponse {
    let (status, body) = run_check(app.probe.as_ref(), q.proxyip.as_deref()).await;
    (status, Json(body))
}
