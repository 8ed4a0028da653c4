//! Background sweep task for expired pairing codes.
//!
//! Runs periodically to delete codes that outlived their maximum age and
//! to evict idle rate limiter state. Redemption also checks expiry, so
//! the sweep only bounds memory; it is not needed for correctness.

use crate::config::CleanupConfig;
use crate::coordinator::SessionCoordinator;
use crate::limits::RateLimits;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Spawn a background sweep task.
///
/// Returns a handle that can be used to abort the task on shutdown.
pub fn spawn_sweep_task(
    coordinator: Arc<SessionCoordinator>,
    rate_limits: RateLimits,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Sweep task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Sweep task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            let expired = coordinator.sweep_expired().await;
            if expired > 0 {
                tracing::info!("Sweep: removed {} expired pairing codes", expired);
            } else {
                tracing::debug!("Sweep: no expired pairing codes");
            }

            rate_limits.shrink();
        }
    })
}
