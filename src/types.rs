use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Placeholder used for every field that could not be determined.
pub const UNKNOWN: &str = "Unknown";

/// Address a probe connects to instead of the reference host itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub ip: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }
}

/// What one probe of the reference host yielded.
///
/// `body` is empty whenever the connection, handshake, read or JSON decode failed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub body: Map<String, Value>,
    pub protocol: String,
    pub elapsed_ms: f64,
}

impl Default for ProbeResult {
    fn default() -> Self {
        Self {
            body: Map::new(),
            protocol: UNKNOWN.to_string(),
            elapsed_ms: 0.0,
        }
    }
}

impl ProbeResult {
    /// True when the body carries data and the reference host did not report an error.
    pub fn is_usable(&self) -> bool {
        !self.body.is_empty() && !self.body.contains_key("error")
    }

    pub fn client_ip(&self) -> Option<&Value> {
        self.body.get("clientIp")
    }
}

/// Outcome of classifying one candidate proxy.
///
/// Enrichment fields keep the JSON type the reference host reported (`asn` is
/// usually a number, coordinates are strings) and hold `"Unknown"` otherwise.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Verdict {
    pub alive: bool,
    pub message: String,
    pub country_code: String,
    pub asn: Value,
    pub country_name: String,
    pub country_flag: Option<String>,
    pub protocol: String,
    pub org_name: String,
    pub elapsed_ms: f64,
    pub latitude: Value,
    pub longitude: Value,
    pub colo: Value,
}

impl Verdict {
    pub fn dead(ip: &str, port: u16) -> Self {
        Self {
            alive: false,
            message: format!("ProxyIP is Dead: {ip}:{port}"),
            country_code: UNKNOWN.to_string(),
            asn: Value::from(UNKNOWN),
            country_name: UNKNOWN.to_string(),
            country_flag: None,
            protocol: UNKNOWN.to_string(),
            org_name: UNKNOWN.to_string(),
            elapsed_ms: 0.0,
            latitude: Value::from(UNKNOWN),
            longitude: Value::from(UNKNOWN),
            colo: Value::from(UNKNOWN),
        }
    }
}
