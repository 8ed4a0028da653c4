//! Pairing code store.
//!
//! Maps live six digit codes to the connection that requested them.
//! Codes are single-use and expire after a fixed age. A connection holds
//! at most one code; asking again replaces it. The store itself is not
//! synchronized; the coordinator owns it behind its state lock.

use crate::error::PairingError;
use pair_types::{ConnectionId, PairingCode, CODE_SPACE};
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A live pairing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeEntry {
    /// Connection that asked for the code.
    pub requester: ConnectionId,
    /// When the code was issued.
    pub issued_at: Instant,
}

impl CodeEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.issued_at) > ttl
    }
}

/// Issued, unredeemed pairing codes.
#[derive(Debug)]
pub struct PairingCodeStore {
    codes: HashMap<PairingCode, CodeEntry>,
    by_requester: HashMap<ConnectionId, PairingCode>,
    ttl: Duration,
    max_attempts: u32,
}

impl PairingCodeStore {
    /// Create an empty store.
    ///
    /// `max_attempts` random draws are made before `issue` falls back to
    /// scanning the code space for a free slot.
    pub fn new(ttl: Duration, max_attempts: u32) -> Self {
        Self {
            codes: HashMap::new(),
            by_requester: HashMap::new(),
            ttl,
            max_attempts,
        }
    }

    /// Issue a fresh code for `requester`, withdrawing its previous one.
    ///
    /// Codes are drawn uniformly from the full six digit space. A slot
    /// held by an expired entry counts as free. Only when every code is
    /// live does this fail, with [`PairingError::CodeSpaceExhausted`];
    /// the previous code then stays live.
    pub fn issue<R: Rng + ?Sized>(
        &mut self,
        requester: ConnectionId,
        now: Instant,
        rng: &mut R,
    ) -> Result<PairingCode, PairingError> {
        let code = self
            .draw_free(now, rng)
            .or_else(|| self.scan_free(now, rng.gen_range(0..CODE_SPACE)))
            .ok_or(PairingError::CodeSpaceExhausted)?;

        // The slot may still hold an expired entry of another connection
        self.remove_code(&code);
        self.remove_all_for(requester);

        self.codes.insert(
            code.clone(),
            CodeEntry {
                requester,
                issued_at: now,
            },
        );
        self.by_requester.insert(requester, code.clone());
        Ok(code)
    }

    fn remove_code(&mut self, code: &PairingCode) -> Option<CodeEntry> {
        let entry = self.codes.remove(code)?;
        if self.by_requester.get(&entry.requester) == Some(code) {
            self.by_requester.remove(&entry.requester);
        }
        Some(entry)
    }

    fn is_free(&self, code: &PairingCode, now: Instant) -> bool {
        self.codes
            .get(code)
            .map_or(true, |entry| entry.is_expired(now, self.ttl))
    }

    fn draw_free<R: Rng + ?Sized>(&self, now: Instant, rng: &mut R) -> Option<PairingCode> {
        (0..self.max_attempts)
            .map(|_| PairingCode::random(rng))
            .find(|code| self.is_free(code, now))
    }

    fn scan_free(&self, now: Instant, start: u32) -> Option<PairingCode> {
        (0..CODE_SPACE)
            .map(|offset| PairingCode::from_index(start.wrapping_add(offset) % CODE_SPACE))
            .find(|code| self.is_free(code, now))
    }

    /// Redeem `code` on behalf of `redeemer`, returning the requester.
    ///
    /// Absent and expired codes yield [`PairingError::NotFound`]; an
    /// expired entry is dropped on the way. A requester redeeming its own
    /// code gets [`PairingError::SelfPairing`] and the code stays live.
    /// Otherwise the code is consumed.
    pub fn redeem(
        &mut self,
        code: &PairingCode,
        redeemer: ConnectionId,
        now: Instant,
    ) -> Result<ConnectionId, PairingError> {
        let entry = *self.codes.get(code).ok_or(PairingError::NotFound)?;

        if entry.is_expired(now, self.ttl) {
            self.remove_code(code);
            return Err(PairingError::NotFound);
        }
        if entry.requester == redeemer {
            return Err(PairingError::SelfPairing);
        }

        self.remove_code(code);
        Ok(entry.requester)
    }

    /// Remove every code older than the maximum age.
    ///
    /// Returns the expired codes.
    pub fn sweep(&mut self, now: Instant) -> Vec<PairingCode> {
        let ttl = self.ttl;
        let expired: Vec<PairingCode> = self
            .codes
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, ttl))
            .map(|(code, _)| code.clone())
            .collect();

        for code in &expired {
            self.remove_code(code);
        }
        expired
    }

    /// Remove every code issued to `connection`.
    ///
    /// Returns the withdrawn codes.
    pub fn remove_all_for(&mut self, connection: ConnectionId) -> Vec<PairingCode> {
        let Some(code) = self.by_requester.remove(&connection) else {
            return Vec::new();
        };
        self.codes.remove(&code);
        vec![code]
    }

    #[cfg(test)]
    fn code_of(&self, connection: ConnectionId) -> Option<&PairingCode> {
        self.by_requester.get(&connection)
    }

    /// Whether `code` is currently redeemable.
    pub fn is_live(&self, code: &PairingCode, now: Instant) -> bool {
        !self.is_free(code, now)
    }

    /// Number of stored codes, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the store holds no codes.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
