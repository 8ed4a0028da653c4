//! Health check endpoint.

use crate::server::PairRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Always `"ok"` while the relay is serving.
    pub status: &'static str,
    /// Relay version.
    pub version: &'static str,
    /// Live device connections.
    pub connections: usize,
    /// Bound pairs.
    pub pairs: usize,
    /// Pairing codes waiting to be redeemed.
    pub pending_codes: usize,
    /// Seconds since the relay started.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Snapshot the relay's current state.
    pub async fn collect(relay: &PairRelay) -> Self {
        let coordinator = relay.coordinator();
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            connections: relay.total_connections(),
            pairs: coordinator.pair_count().await,
            pending_codes: coordinator.pending_codes().await,
            uptime_seconds: relay.uptime().as_secs(),
        }
    }
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<PairRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus::collect(&relay).await)
}
