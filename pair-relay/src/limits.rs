//! Rate limiting for pair-relay.
//!
//! Protects the relay against command spam. Location updates arrive
//! continuously from every paired device, so quotas are sized for a
//! steady stream rather than occasional requests.
//!
//! Two limiters apply to every command:
//! - **ConnectionId** keyed, for per-connection fairness
//! - a direct limiter, capping aggregate throughput across all connections
//!
//! Both use the governor crate; the keyed limiter is backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use pair_types::ConnectionId;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits commands per connection.
    ///
    /// Configured via `limits.messages_per_minute`.
    command_limiter: Arc<KeyedLimiter<ConnectionId>>,

    /// Global rate limiter across all connections.
    ///
    /// Configured via `limits.global_requests_per_second`.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("command_limiter", &"KeyedLimiter<ConnectionId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// A zero quota is treated as one.
    pub fn new(config: &LimitsConfig) -> Self {
        let per_minute = NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_rps =
            NonZeroU32::new(config.global_requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            command_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        }
    }

    /// Check whether a command from `connection` is allowed.
    ///
    /// The global limit is checked first, so a globally rejected command
    /// does not consume the connection's quota.
    pub fn check_command(&self, connection: &ConnectionId) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)?;
        self.command_limiter
            .check_key(connection)
            .map_err(|_| RateLimitError::CommandLimitExceeded)
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn tracked_connections(&self) -> usize {
        self.command_limiter.len()
    }

    /// Evict stale entries from the keyed limiter.
    ///
    /// Removes entries whose cells have fully recharged. Called
    /// periodically from the sweep task.
    pub fn shrink(&self) {
        self.command_limiter.retain_recent();
        self.command_limiter.shrink_to_fit();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many commands from this connection.
    #[error("command rate limit exceeded")]
    CommandLimitExceeded,
    /// Global request rate exceeded across all connections.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
