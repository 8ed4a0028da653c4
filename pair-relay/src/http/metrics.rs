//! Prometheus metrics endpoint.

use crate::server::PairRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<PairRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay).await,
    )
}

async fn render(relay: &PairRelay) -> String {
    let m = relay.metrics();

    let gauges: [(&str, &str, u64); 4] = [
        (
            "connections_active",
            "Number of live device connections",
            relay.total_connections() as u64,
        ),
        (
            "pairs_active",
            "Number of bound device pairs",
            relay.coordinator().pair_count().await as u64,
        ),
        (
            "codes_pending",
            "Number of pairing codes awaiting redemption",
            relay.coordinator().pending_codes().await as u64,
        ),
        (
            "rate_limit_keys",
            "Number of connections tracked by the rate limiter",
            relay.rate_limits().tracked_connections() as u64,
        ),
    ];

    let counters = [
        (
            "connections_total",
            "Total connections accepted",
            &m.connections_total,
        ),
        (
            "codes_issued_total",
            "Total pairing codes issued",
            &m.codes_issued,
        ),
        (
            "pairings_total",
            "Total successful pairings",
            &m.pairings_total,
        ),
        (
            "pairing_failures_total",
            "Total failed pairing attempts",
            &m.pairing_failures,
        ),
        (
            "locations_relayed_total",
            "Total location updates delivered to a partner queue",
            &m.locations_relayed,
        ),
        (
            "locations_dropped_total",
            "Total location updates dropped",
            &m.locations_dropped,
        ),
        (
            "unpairs_total",
            "Total explicit unpairs",
            &m.unpairs_total,
        ),
        (
            "disconnect_unbinds_total",
            "Total pairs dissolved by a disconnect",
            &m.disconnect_unbinds,
        ),
        (
            "codes_expired_total",
            "Total pairing codes removed by the expiry sweep",
            &m.codes_expired,
        ),
        (
            "rate_limit_hits_total",
            "Total rate limit rejections",
            &m.rate_limit_hits,
        ),
        (
            "errors_total",
            "Total protocol errors",
            &m.errors_total,
        ),
    ];

    let mut body = String::new();
    for (name, help, value) in gauges {
        write_sample(&mut body, name, "gauge", help, "", value);
    }

    let version = format!("{{version=\"{}\"}}", env!("CARGO_PKG_VERSION"));
    write_sample(&mut body, "info", "gauge", "Server information", &version, 1);

    for (name, help, counter) in counters {
        let value = counter.load(Ordering::Relaxed);
        write_sample(&mut body, name, "counter", help, "", value);
    }

    body
}

/// Append one metric family with a single sample.
fn write_sample(body: &mut String, name: &str, kind: &str, help: &str, labels: &str, value: u64) {
    let _ = writeln!(body, "# HELP pair_relay_{name} {help}");
    let _ = writeln!(body, "# TYPE pair_relay_{name} {kind}");
    let _ = writeln!(body, "pair_relay_{name}{labels} {value}\n");
}
