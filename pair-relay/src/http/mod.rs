//! HTTP endpoints for pair-relay.
//!
//! Serves the device WebSocket endpoint plus health checks and metrics.

pub mod health;
mod metrics;

use crate::protocol::{ws_handler, WS_PATH};
use crate::server::PairRelay;
use axum::{routing::get, Extension, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<PairRelay>) -> Router {
    let mut router = Router::new()
        .route(WS_PATH, get(ws_handler))
        .route("/health", get(health::health_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(relay))
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    relay: Arc<PairRelay>,
    listener: TcpListener,
    shutdown: F,
) -> crate::error::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(relay).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
