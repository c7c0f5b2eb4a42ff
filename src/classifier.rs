use anyhow::Result;
use serde_json::{Map, Value};
use tracing::info;

use crate::country;
use crate::probe::Probe;
use crate::types::{ProbeResult, ProbeTarget, Verdict, UNKNOWN};

/// Decide whether `ip:port` intermediates traffic to the reference host.
///
/// Probes the reference host directly, then through the candidate, strictly in
/// that order. Errors are only returned for faults the probe itself could not absorb.
pub async fn process_proxy(probe: &dyn Probe, ip: &str, port: u16) -> Result<Verdict> {
    let baseline = probe.check(None).await?;
    let via_proxy = probe.check(Some(&ProbeTarget::new(ip, port))).await?;

    let verdict = if is_alive(&baseline, &via_proxy) {
        alive_verdict(ip, port, &via_proxy)
    } else {
        Verdict::dead(ip, port)
    };
    info!(%ip, port, alive = verdict.alive, elapsed_ms = verdict.elapsed_ms, "proxy classified");
    Ok(verdict)
}

/// Both probes answered without error and the reference host saw different client addresses.
pub fn is_alive(baseline: &ProbeResult, via_proxy: &ProbeResult) -> bool {
    baseline.is_usable() && via_proxy.is_usable() && baseline.client_ip() != via_proxy.client_ip()
}

fn alive_verdict(ip: &str, port: u16, via_proxy: &ProbeResult) -> Verdict {
    let body = &via_proxy.body;

    let country_code = body
        .get("country")
        .filter(|v| is_truthy(v))
        .map(value_text)
        .unwrap_or_else(|| UNKNOWN.to_string());
    let (country_name, country_flag) = match country::lookup(&country_code) {
        Some(info) => (info.name, Some(info.flag)),
        None => (UNKNOWN.to_string(), None),
    };

    let org_name = body
        .get("asOrganization")
        .filter(|v| is_truthy(v))
        .map(|v| clean_org_name(&value_text(v)))
        .unwrap_or_else(|| UNKNOWN.to_string());

    Verdict {
        alive: true,
        message: format!("ProxyIP is Alive: {ip}:{port}"),
        country_code,
        asn: field_or_unknown(body, "asn"),
        country_name,
        country_flag,
        protocol: via_proxy.protocol.clone(),
        org_name,
        elapsed_ms: via_proxy.elapsed_ms,
        latitude: field_or_unknown(body, "latitude"),
        longitude: field_or_unknown(body, "longitude"),
        colo: field_or_unknown(body, "colo"),
    }
}

/// Keep ASCII letters, digits and spaces; drop everything else.
pub fn clean_org_name(org: &str) -> String {
    org.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}

fn field_or_unknown(body: &Map<String, Value>, key: &str) -> Value {
    body.get(key)
        .filter(|v| is_truthy(v))
        .cloned()
        .unwrap_or_else(|| Value::from(UNKNOWN))
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON values that count as "present": not null, false, zero or empty.
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
