//! Main PairRelay server coordination.
//!
//! PairRelay owns the connection registry, the session coordinator, rate
//! limits and metrics, and routes commands from connections to the
//! coordinator.

use crate::config::Config;
use crate::coordinator::{SessionCoordinator, MSG_INVALID_CODE};
use crate::limits::RateLimits;
use crate::registry::ConnectionRegistry;
use pair_types::{Command, ConnectionId, Event, PairingCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total pairing codes issued.
    pub codes_issued: AtomicU64,
    /// Total successful pairings.
    pub pairings_total: AtomicU64,
    /// Total failed pairing attempts.
    pub pairing_failures: AtomicU64,
    /// Total location updates queued for a partner.
    pub locations_relayed: AtomicU64,
    /// Total location updates dropped (sender unbound or partner queue full).
    pub locations_dropped: AtomicU64,
    /// Total explicit unpairs.
    pub unpairs_total: AtomicU64,
    /// Total pairings dissolved by a disconnect.
    pub disconnect_unbinds: AtomicU64,
    /// Total pairing codes removed by the expiry sweep.
    pub codes_expired: AtomicU64,
    /// Total rate limit rejections (connection cap + per-connection + global).
    pub rate_limit_hits: AtomicU64,
    /// Total protocol and internal errors.
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct PairRelay {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<SessionCoordinator>,
    /// Rate limiters for commands.
    rate_limits: RateLimits,
    /// Operational metrics (counters).
    metrics: Arc<RelayMetrics>,
    /// One permit per admitted connection, up to `limits.max_connections`.
    connection_slots: Arc<Semaphore>,
    started_at: Instant,
}

impl std::fmt::Debug for PairRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl PairRelay {
    /// Create a new PairRelay with the given config.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.limits.outbound_queue));
        let metrics = Arc::new(RelayMetrics::default());
        let coordinator = Arc::new(SessionCoordinator::new(
            &config.pairing,
            registry.clone(),
            metrics.clone(),
        ));
        let rate_limits = RateLimits::new(&config.limits);
        let slots = config.limits.max_connections.min(Semaphore::MAX_PERMITS);

        Self {
            config,
            registry,
            coordinator,
            rate_limits,
            metrics,
            connection_slots: Arc::new(Semaphore::new(slots)),
            started_at: Instant::now(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the session coordinator.
    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Get a clone of the coordinator Arc for background tasks.
    pub fn coordinator_arc(&self) -> Arc<SessionCoordinator> {
        self.coordinator.clone()
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Reserve a slot for a new connection.
    ///
    /// Returns `None` once `limits.max_connections` slots are held. The
    /// slot is released when the permit is dropped, so the caller keeps
    /// it for the lifetime of the connection.
    pub fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        self.connection_slots.clone().try_acquire_owned().ok()
    }

    /// Register a newly accepted connection.
    ///
    /// Returns its identifier and the queue of events to write to it.
    pub fn connect(
        &self,
        remote_addr: Option<SocketAddr>,
    ) -> (ConnectionId, mpsc::Receiver<Event>) {
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        let (id, rx) = self.registry.register(remote_addr);
        tracing::info!("Connection {} from {:?}", id, remote_addr);
        (id, rx)
    }

    /// Route one command from connection `id` to the coordinator.
    pub async fn handle_command(&self, id: ConnectionId, command: Command) {
        tracing::trace!("{} -> {}", id, command.name());
        match command {
            Command::GenerateCode => {
                let _ = self.coordinator.generate_code(id).await;
            }
            Command::PairWithCode(input) => match PairingCode::parse(&input) {
                Ok(code) => {
                    let _ = self.coordinator.pair_with_code(id, &code).await;
                }
                Err(e) => {
                    tracing::debug!("{} sent malformed code: {}", id, e);
                    self.coordinator.reject_pairing(id, MSG_INVALID_CODE);
                }
            },
            Command::LocationUpdate(payload) => {
                self.coordinator.relay_location(id, payload).await;
            }
            Command::Unpair => {
                self.coordinator.unpair(id).await;
            }
        }
    }

    /// Tear down connection `id`.
    ///
    /// Safe to call from every close path: only the first call per
    /// connection reaches the coordinator. Returns whether this call did
    /// the teardown.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(info) = self.registry.close(id) else {
            return false;
        };
        self.coordinator.disconnect(id).await;
        tracing::info!(
            "Connection {} from {:?} closed after {}s",
            id,
            info.remote_addr,
            info.connected_at.elapsed().as_secs()
        );
        true
    }

    /// Number of live connections.
    pub fn total_connections(&self) -> usize {
        self.registry.len()
    }

    /// Time since the relay was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
