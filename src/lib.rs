//! Library crate for proxyip-check: probes a candidate `IP:PORT` and decides whether it
//! works as a transparent HTTPS proxy in front of the reference host.
pub mod classifier;
pub mod config;
pub mod country;
pub mod probe;
pub mod server;
pub mod types;
