//! Pairing and relay session coordinator.
//!
//! Turns anonymous connections into bound pairs and routes location
//! updates between the two sides of a pair.
//!
//! ## Locking
//!
//! The code store and the pairing table live together behind one
//! `RwLock`. Every mutation takes the write lock, so redeeming a code and
//! binding the pair happen in one critical section. Events produced by an
//! operation are collected while the lock is held and handed to the
//! [`EventSink`] only after it is released.
//!
//! ## Per-connection states
//!
//! ```text
//!            pair_with_code (either side)
//!  Unbound ─────────────────────────────► Bound
//!     ▲                                     │
//!     └──────── unpair / disconnect ────────┘
//! ```

use crate::codes::PairingCodeStore;
use crate::config::PairingConfig;
use crate::error::PairingError;
use crate::server::RelayMetrics;
use crate::table::PairingTable;
use pair_types::{ConnectionId, Event, LocationPayload, PairId, PairingCode, PairingResult};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Failure message for unknown, expired, or malformed codes.
pub const MSG_INVALID_CODE: &str = "invalid pairing code";
/// Failure message when a device redeems its own code.
pub const MSG_SELF_PAIRING: &str = "cannot pair with self";
/// Failure message when the requesting device is already bound.
pub const MSG_ALREADY_PAIRED: &str = "already paired";
/// Failure message when the relay cannot complete pairing.
pub const MSG_UNAVAILABLE: &str = "pairing unavailable";

/// Delivery capability for outbound events.
///
/// Implemented by the transport layer. Delivery is best effort and must
/// not block: an event that cannot be queued is dropped.
pub trait EventSink: Send + Sync {
    /// Queue `event` for connection `to`.
    ///
    /// Returns `false` if the event was dropped.
    fn send(&self, to: ConnectionId, event: Event) -> bool;
}

struct PairingState {
    codes: PairingCodeStore,
    pairs: PairingTable,
}

/// Events to emit once the state lock is released.
#[derive(Default)]
struct Outbox(Vec<(ConnectionId, Event)>);

impl Outbox {
    fn push(&mut self, to: ConnectionId, event: Event) {
        self.0.push((to, event));
    }
}

/// The pairing and relay coordinator.
pub struct SessionCoordinator {
    state: RwLock<PairingState>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// Create a coordinator delivering events through `sink`.
    pub fn new(
        config: &PairingConfig,
        sink: Arc<dyn EventSink>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            state: RwLock::new(PairingState {
                codes: PairingCodeStore::new(config.code_ttl(), config.max_issue_attempts),
                pairs: PairingTable::new(),
            }),
            sink,
            metrics,
        }
    }

    fn dispatch(&self, outbox: Outbox) {
        for (to, event) in outbox.0 {
            self.sink.send(to, event);
        }
    }

    /// Issue a pairing code to `requester`.
    ///
    /// The code goes to the requester only. A bound requester gets a
    /// failed `pairing_result` instead.
    pub async fn generate_code(
        &self,
        requester: ConnectionId,
    ) -> Result<PairingCode, PairingError> {
        let result = {
            let mut state = self.state.write().await;
            if state.pairs.is_bound(requester) {
                Err(PairingError::AlreadyBound)
            } else {
                state
                    .codes
                    .issue(requester, Instant::now(), &mut rand::thread_rng())
            }
        };

        match &result {
            Ok(code) => {
                tracing::debug!("Issued pairing code {} to {}", code, requester);
                self.metrics.codes_issued.fetch_add(1, Ordering::Relaxed);
                self.sink.send(requester, Event::PairingCode(code.clone()));
            }
            Err(PairingError::AlreadyBound) => {
                tracing::debug!("Refused code for bound connection {}", requester);
                self.reject_pairing(requester, MSG_ALREADY_PAIRED);
            }
            Err(e) => {
                tracing::error!("Cannot issue pairing code to {}: {}", requester, e);
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                self.reject_pairing(requester, MSG_UNAVAILABLE);
            }
        }
        result
    }

    /// Redeem `code` on behalf of `redeemer`.
    ///
    /// On success both connections receive the same pair identifier and
    /// every code either side still held is withdrawn. On failure only the
    /// redeemer hears about it and no state changes, except that an
    /// expired code is dropped.
    pub async fn pair_with_code(
        &self,
        redeemer: ConnectionId,
        code: &PairingCode,
    ) -> Result<PairId, PairingError> {
        let mut outbox = Outbox::default();

        let result = {
            let mut state = self.state.write().await;
            if state.pairs.is_bound(redeemer) {
                drop(state);
                tracing::debug!("{} tried to redeem {} while bound", redeemer, code);
                self.reject_pairing(redeemer, MSG_ALREADY_PAIRED);
                return Err(PairingError::AlreadyBound);
            }

            let now = Instant::now();
            state
                .codes
                .redeem(code, redeemer, now)
                .and_then(|requester| {
                    let pair_id = state.pairs.bind(requester, redeemer)?;
                    state.codes.remove_all_for(requester);
                    state.codes.remove_all_for(redeemer);
                    Ok((requester, pair_id))
                })
        };

        match result {
            Ok((requester, pair_id)) => {
                tracing::info!(
                    "Paired {} with {} via code {} (pair {})",
                    redeemer,
                    requester,
                    code,
                    pair_id
                );
                self.metrics.pairings_total.fetch_add(1, Ordering::Relaxed);
                let success = Event::PairingResult(PairingResult::success(pair_id));
                outbox.push(redeemer, success.clone());
                outbox.push(requester, success);
                self.dispatch(outbox);
                Ok(pair_id)
            }
            Err(e) => {
                let message = match e {
                    PairingError::NotFound => {
                        tracing::debug!("{} redeemed unknown code {}", redeemer, code);
                        MSG_INVALID_CODE
                    }
                    PairingError::SelfPairing => {
                        tracing::debug!("{} redeemed its own code {}", redeemer, code);
                        MSG_SELF_PAIRING
                    }
                    other => {
                        tracing::error!(
                            "Pairing state inconsistent redeeming {} for {}: {}",
                            code,
                            redeemer,
                            other
                        );
                        self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                        MSG_UNAVAILABLE
                    }
                };
                self.reject_pairing(redeemer, message);
                Err(e)
            }
        }
    }

    /// Send a failed `pairing_result` to `connection`.
    ///
    /// Used for malformed codes, which never reach the code store.
    pub fn reject_pairing(&self, connection: ConnectionId, message: &str) {
        self.metrics.pairing_failures.fetch_add(1, Ordering::Relaxed);
        self.sink.send(
            connection,
            Event::PairingResult(PairingResult::failure(message)),
        );
    }

    /// Forward a location update from `sender` to its partner.
    ///
    /// Updates from unbound connections are dropped silently. Returns
    /// whether the update was queued for the partner.
    pub async fn relay_location(&self, sender: ConnectionId, payload: LocationPayload) -> bool {
        let partner = self.state.read().await.pairs.partner_of(sender);

        match partner {
            Ok(partner) => {
                let queued = self.sink.send(partner, Event::PartnerLocation(payload));
                if queued {
                    self.metrics.locations_relayed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.metrics.locations_dropped.fetch_add(1, Ordering::Relaxed);
                }
                queued
            }
            Err(_) => {
                tracing::debug!("Dropping location from unbound connection {}", sender);
                self.metrics.locations_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dissolve the pairing of `requester`.
    ///
    /// The former partner receives `partner_unpaired`. The requester is
    /// always acknowledged with `unpair_success`, even when it was not
    /// bound. Returns the former partner.
    pub async fn unpair(&self, requester: ConnectionId) -> Option<ConnectionId> {
        let unbound = self.state.write().await.pairs.unbind(requester).ok();

        let mut outbox = Outbox::default();
        if let Some(unbound) = &unbound {
            tracing::info!(
                "{} unpaired from {} (pair {})",
                requester,
                unbound.partner,
                unbound.pair_id
            );
            self.metrics.unpairs_total.fetch_add(1, Ordering::Relaxed);
            outbox.push(unbound.partner, Event::PartnerUnpaired);
        } else {
            tracing::debug!("Unpair from unbound connection {}", requester);
        }
        outbox.push(requester, Event::UnpairSuccess);
        self.dispatch(outbox);

        unbound.map(|u| u.partner)
    }

    /// Clean up after `connection` went away.
    ///
    /// Dissolves its pairing, notifying the partner with
    /// `partner_disconnected`, and withdraws any codes it held. Returns
    /// the former partner.
    pub async fn disconnect(&self, connection: ConnectionId) -> Option<ConnectionId> {
        let (unbound, withdrawn) = {
            let mut state = self.state.write().await;
            let unbound = state.pairs.unbind(connection).ok();
            let withdrawn = state.codes.remove_all_for(connection);
            (unbound, withdrawn)
        };

        for code in &withdrawn {
            tracing::debug!("Withdrew code {} of disconnected {}", code, connection);
        }

        let unbound = unbound?;
        tracing::info!(
            "{} disconnected, unpairing {} (pair {})",
            connection,
            unbound.partner,
            unbound.pair_id
        );
        self.metrics.disconnect_unbinds.fetch_add(1, Ordering::Relaxed);
        self.sink.send(unbound.partner, Event::PartnerDisconnected);
        Some(unbound.partner)
    }

    /// Remove codes older than the maximum age.
    ///
    /// Returns the number of codes removed.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now()).await
    }

    /// Remove codes that are expired as of `now`.
    pub async fn sweep_expired_at(&self, now: Instant) -> usize {
        let expired = self.state.write().await.codes.sweep(now);
        for code in &expired {
            tracing::debug!("Pairing code {} expired", code);
        }
        self.metrics
            .codes_expired
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Partner of `connection`.
    pub async fn partner_of(
        &self,
        connection: ConnectionId,
    ) -> Result<ConnectionId, PairingError> {
        self.state.read().await.pairs.partner_of(connection)
    }

    /// Pair identifier of `connection`.
    pub async fn pair_id_of(&self, connection: ConnectionId) -> Result<PairId, PairingError> {
        self.state.read().await.pairs.pair_id_of(connection)
    }

    /// Whether `code` is currently redeemable.
    pub async fn is_code_live(&self, code: &PairingCode) -> bool {
        self.state.read().await.codes.is_live(code, Instant::now())
    }

    /// Number of stored codes, including expired ones not yet swept.
    pub async fn pending_codes(&self) -> usize {
        self.state.read().await.codes.len()
    }

    /// Number of bound pairs.
    pub async fn pair_count(&self) -> usize {
        self.state.read().await.pairs.pair_count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Sink that records every event instead of delivering it.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        sent: Mutex<Vec<(ConnectionId, Event)>>,
    }

    impl RecordingSink {
        pub(crate) fn events_for(&self, id: ConnectionId) -> Vec<Event> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| *to == id)
                .map(|(_, event)| event.clone())
                .collect()
        }

        pub(crate) fn total(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub(crate) fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    impl EventSink for RecordingSink {
        fn send(&self, to: ConnectionId, event: Event) -> bool {
            self.sent.lock().unwrap().push((to, event));
            true
        }
    }

    fn setup() -> (Arc<SessionCoordinator>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let coordinator = SessionCoordinator::new(
            &PairingConfig::default(),
            sink.clone(),
            Arc::new(RelayMetrics::default()),
        );
        (Arc::new(coordinator), sink)
    }

    async fn paired(
        coordinator: &SessionCoordinator,
        sink: &RecordingSink,
    ) -> (ConnectionId, ConnectionId, PairId) {
        let x = ConnectionId::new();
        let y = ConnectionId::new();
        let code = coordinator.generate_code(x).await.unwrap();
        let pair_id = coordinator.pair_with_code(y, &code).await.unwrap();
        sink.clear();
        (x, y, pair_id)
    }

    fn failure(message: &str) -> Event {
        Event::PairingResult(PairingResult::failure(message))
    }

    #[tokio::test]
    async fn generate_code_goes_to_requester_only() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();

        let code = coordinator.generate_code(x).await.unwrap();
        assert_eq!(sink.events_for(x), vec![Event::PairingCode(code.clone())]);
        assert_eq!(sink.total(), 1);
        assert!(coordinator.is_code_live(&code).await);
    }

    #[tokio::test]
    async fn pairing_notifies_both_with_same_pair_id() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();
        let y = ConnectionId::new();

        let code = coordinator.generate_code(x).await.unwrap();
        sink.clear();
        let pair_id = coordinator.pair_with_code(y, &code).await.unwrap();

        let expected = Event::PairingResult(PairingResult::success(pair_id));
        assert_eq!(sink.events_for(x), vec![expected.clone()]);
        assert_eq!(sink.events_for(y), vec![expected]);

        assert_eq!(coordinator.partner_of(x).await, Ok(y));
        assert_eq!(coordinator.partner_of(y).await, Ok(x));
        assert_eq!(coordinator.pair_id_of(x).await, Ok(pair_id));
        assert_eq!(coordinator.pair_id_of(y).await, Ok(pair_id));
        assert!(!coordinator.is_code_live(&code).await);
    }

    #[tokio::test]
    async fn second_redemption_is_not_found() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();
        let y = ConnectionId::new();
        let z = ConnectionId::new();

        let code = coordinator.generate_code(x).await.unwrap();
        coordinator.pair_with_code(y, &code).await.unwrap();

        assert_eq!(
            coordinator.pair_with_code(z, &code).await,
            Err(PairingError::NotFound)
        );
        assert_eq!(sink.events_for(z), vec![failure(MSG_INVALID_CODE)]);
    }

    #[tokio::test]
    async fn self_pairing_fails_and_keeps_code() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();
        let y = ConnectionId::new();

        let code = coordinator.generate_code(x).await.unwrap();
        sink.clear();

        assert_eq!(
            coordinator.pair_with_code(x, &code).await,
            Err(PairingError::SelfPairing)
        );
        assert_eq!(sink.events_for(x), vec![failure(MSG_SELF_PAIRING)]);
        assert_eq!(sink.total(), 1);
        assert!(coordinator.is_code_live(&code).await);

        assert!(coordinator.pair_with_code(y, &code).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_code_changes_nothing() {
        let (coordinator, sink) = setup();
        let y = ConnectionId::new();
        let code = PairingCode::parse("000000").unwrap();

        assert_eq!(
            coordinator.pair_with_code(y, &code).await,
            Err(PairingError::NotFound)
        );
        assert_eq!(sink.events_for(y), vec![failure(MSG_INVALID_CODE)]);
        assert_eq!(coordinator.pair_count().await, 0);
    }

    #[tokio::test]
    async fn bound_connection_cannot_pair_again() {
        let (coordinator, sink) = setup();
        let (x, y, pair_id) = paired(&coordinator, &sink).await;
        let z = ConnectionId::new();

        let code = coordinator.generate_code(z).await.unwrap();
        sink.clear();

        assert_eq!(
            coordinator.pair_with_code(x, &code).await,
            Err(PairingError::AlreadyBound)
        );
        assert_eq!(sink.events_for(x), vec![failure(MSG_ALREADY_PAIRED)]);
        assert_eq!(coordinator.pair_id_of(y).await, Ok(pair_id));
        assert!(coordinator.is_code_live(&code).await);
    }

    #[tokio::test]
    async fn bound_connection_cannot_generate_code() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = Arc::new(RelayMetrics::default());
        let coordinator =
            SessionCoordinator::new(&PairingConfig::default(), sink.clone(), metrics.clone());
        let (x, _y, _) = paired(&coordinator, &sink).await;

        assert_eq!(
            coordinator.generate_code(x).await,
            Err(PairingError::AlreadyBound)
        );
        assert_eq!(sink.events_for(x), vec![failure(MSG_ALREADY_PAIRED)]);
        assert_eq!(coordinator.pending_codes().await, 0);
        assert_eq!(metrics.pairing_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn repeated_generate_code_replaces_previous() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();
        let y = ConnectionId::new();

        let first = coordinator.generate_code(x).await.unwrap();
        let second = coordinator.generate_code(x).await.unwrap();
        assert_eq!(coordinator.pending_codes().await, 1);

        sink.clear();
        assert_eq!(
            coordinator.pair_with_code(y, &first).await,
            Err(PairingError::NotFound)
        );
        assert!(coordinator.pair_with_code(y, &second).await.is_ok());
    }

    #[tokio::test]
    async fn pairing_withdraws_outstanding_codes_of_both_sides() {
        let (coordinator, _sink) = setup();
        let x = ConnectionId::new();
        let y = ConnectionId::new();

        let x_code = coordinator.generate_code(x).await.unwrap();
        let y_code = coordinator.generate_code(y).await.unwrap();
        coordinator.pair_with_code(x, &y_code).await.unwrap();

        assert!(!coordinator.is_code_live(&x_code).await);
        assert_eq!(coordinator.pending_codes().await, 0);
    }

    #[tokio::test]
    async fn location_goes_to_partner_only() {
        let (coordinator, sink) = setup();
        let (x, y, _) = paired(&coordinator, &sink).await;
        let bystander = ConnectionId::new();

        let payload = LocationPayload::new(json!({"lat": 1, "lng": 2}));
        assert!(coordinator.relay_location(x, payload.clone()).await);

        assert_eq!(sink.events_for(y), vec![Event::PartnerLocation(payload)]);
        assert!(sink.events_for(x).is_empty());
        assert!(sink.events_for(bystander).is_empty());
        assert_eq!(sink.total(), 1);
    }

    #[tokio::test]
    async fn location_from_unbound_is_dropped_silently() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();

        let payload = LocationPayload::new(json!({"lat": 1, "lng": 2}));
        assert!(!coordinator.relay_location(x, payload).await);
        assert_eq!(sink.total(), 0);
    }

    #[tokio::test]
    async fn unpair_notifies_both_sides() {
        let (coordinator, sink) = setup();
        let (x, y, _) = paired(&coordinator, &sink).await;

        assert_eq!(coordinator.unpair(x).await, Some(y));
        assert_eq!(sink.events_for(x), vec![Event::UnpairSuccess]);
        assert_eq!(sink.events_for(y), vec![Event::PartnerUnpaired]);

        assert_eq!(coordinator.partner_of(x).await, Err(PairingError::NotBound));
        assert_eq!(coordinator.partner_of(y).await, Err(PairingError::NotBound));
        assert_eq!(coordinator.pair_count().await, 0);
    }

    #[tokio::test]
    async fn unpair_when_unbound_still_acknowledges() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();

        assert_eq!(coordinator.unpair(x).await, None);
        assert_eq!(sink.events_for(x), vec![Event::UnpairSuccess]);
        assert_eq!(sink.total(), 1);
    }

    #[tokio::test]
    async fn disconnect_notifies_partner_and_unbinds() {
        let (coordinator, sink) = setup();
        let (x, y, _) = paired(&coordinator, &sink).await;

        assert_eq!(coordinator.disconnect(x).await, Some(y));
        assert_eq!(sink.events_for(y), vec![Event::PartnerDisconnected]);
        assert!(sink.events_for(x).is_empty());

        // Y's later updates go nowhere
        sink.clear();
        let payload = LocationPayload::new(json!({"lat": 3, "lng": 4}));
        assert!(!coordinator.relay_location(y, payload).await);
        assert_eq!(sink.total(), 0);
    }

    #[tokio::test]
    async fn disconnect_withdraws_codes() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();
        let y = ConnectionId::new();

        let code = coordinator.generate_code(x).await.unwrap();
        assert_eq!(coordinator.disconnect(x).await, None);
        assert!(!coordinator.is_code_live(&code).await);

        assert_eq!(
            coordinator.pair_with_code(y, &code).await,
            Err(PairingError::NotFound)
        );
        assert_eq!(sink.events_for(y), vec![failure(MSG_INVALID_CODE)]);
    }

    #[tokio::test]
    async fn sweep_expires_old_codes() {
        let (coordinator, _sink) = setup();
        let x = ConnectionId::new();
        let code = coordinator.generate_code(x).await.unwrap();

        assert_eq!(coordinator.sweep_expired().await, 0);
        assert!(coordinator.is_code_live(&code).await);

        let ttl = PairingConfig::default().code_ttl();
        let later = Instant::now() + ttl + std::time::Duration::from_secs(1);
        assert_eq!(coordinator.sweep_expired_at(later).await, 1);
        assert_eq!(coordinator.pending_codes().await, 0);
    }

    #[tokio::test]
    async fn reject_pairing_sends_failure() {
        let (coordinator, sink) = setup();
        let x = ConnectionId::new();

        coordinator.reject_pairing(x, MSG_INVALID_CODE);
        assert_eq!(sink.events_for(x), vec![failure(MSG_INVALID_CODE)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemption_has_one_winner() {
        let (coordinator, sink) = setup();
        let issuer = ConnectionId::new();
        let code = coordinator.generate_code(issuer).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let coordinator = coordinator.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                coordinator.pair_with_code(ConnectionId::new(), &code).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(coordinator.pair_count().await, 1);

        let issuer_events = sink.events_for(issuer);
        let successes = issuer_events
            .iter()
            .filter(|e| matches!(e, Event::PairingResult(r) if r.success))
            .count();
        assert_eq!(successes, 1);
    }
}
