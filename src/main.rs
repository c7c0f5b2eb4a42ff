use std::sync::Arc;
use std::time::Duration;

use proxyip_check::config::{ProbeConfig, DEFAULT_HOST, DEFAULT_PATH};
use proxyip_check::probe::TlsProbe;
use proxyip_check::server;

use anyhow::{bail, Result};
use axum::http::StatusCode;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// proxyip-check — checks whether an IP:PORT transparently proxies HTTPS to a reference host.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "proxyip-check",
    version,
    about = "Checks whether an IP:PORT transparently proxies HTTPS to a reference host.",
    long_about = None
)]
struct Cli {
    /// Address the HTTP API listens on.
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: String,

    /// Reference host probed directly and presented via SNI/Host through the candidate.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Path on the reference host that echoes client metadata as JSON.
    #[arg(long, default_value = DEFAULT_PATH)]
    path: String,

    /// TCP connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 5000)]
    timeout_ms: u64,

    /// Deadline in milliseconds for handshake, request and read. Unbounded when omitted.
    #[arg(long = "io-timeout-ms")]
    io_timeout_ms: Option<u64>,

    /// Accept invalid TLS certificates from the reference host or candidate.
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Check a single IP[:PORT], print the JSON result and exit instead of serving.
    #[arg(long)]
    check: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ProbeConfig::default()
        .with_host(cli.host.clone())
        .with_path(cli.path.clone())
        .with_connect_timeout(Duration::from_millis(cli.timeout_ms))
        .with_io_timeout(cli.io_timeout_ms.map(Duration::from_millis))
        .accept_invalid_certs(cli.insecure);
    info!(
        host = %config.host,
        path = %config.path,
        timeout_ms = cli.timeout_ms,
        io_timeout_ms = ?cli.io_timeout_ms,
        insecure = cli.insecure,
        "probe configuration"
    );
    if cli.insecure {
        warn!("certificate verification disabled");
    }

    let probe = Arc::new(TlsProbe::new(config)?);

    if let Some(target) = cli.check.as_deref() {
        let (status, body) = server::run_check(probe.as_ref(), Some(target)).await;
        println!("{}", serde_json::to_string_pretty(&body)?);
        if status != StatusCode::OK {
            bail!("check failed with HTTP {status}");
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        on_ctrl_c.cancel();
    });

    server::spawn_server(&cli.bind, probe, shutdown).await
}
