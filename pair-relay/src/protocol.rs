//! WebSocket upgrade handler for `/ws`.
//!
//! Accepts a connection, registers it, and hands the socket to a
//! [`Session`].

use crate::server::PairRelay;
use crate::session::{Session, WireFormat};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Path devices connect to.
pub const WS_PATH: &str = "/ws";

/// Frames this many times over `max_message_size` are refused by the
/// transport and close the connection. Smaller oversized frames get an
/// `error` event instead.
pub const TRANSPORT_SIZE_FACTOR: usize = 16;

/// Query parameters accepted on upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Outbound encoding, `json` (default) or `msgpack`.
    #[serde(default)]
    pub format: WireFormat,
}

/// Upgrade an HTTP request to a device connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<ConnectParams>,
    Extension(relay): Extension<Arc<PairRelay>>,
) -> Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);

    // Held until the session ends
    let Some(slot) = relay.try_admit() else {
        tracing::warn!(
            "Connection limit reached ({}), rejecting {:?}",
            relay.config().limits.max_connections,
            remote_addr
        );
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let max_frame = relay
        .config()
        .limits
        .max_message_size
        .saturating_mul(TRANSPORT_SIZE_FACTOR);

    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| async move {
            let (id, events) = relay.connect(remote_addr);
            Session::new(relay, id, params.format)
                .run(socket, events)
                .await;
            drop(slot);
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_path() {
        assert_eq!(WS_PATH, "/ws");
    }

    #[test]
    fn connect_params_default_to_json() {
        let params: ConnectParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.format, WireFormat::Json);
    }
}
