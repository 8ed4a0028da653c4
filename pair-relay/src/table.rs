//! Pairing table.
//!
//! Symmetric bindings between two connections. Every binding is stored
//! in both directions with the same [`PairId`], and a connection appears
//! in at most one binding.

use crate::error::PairingError;
use pair_types::{ConnectionId, PairId};
use std::collections::HashMap;

/// One side of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// The other connection of the pair.
    pub partner: ConnectionId,
    /// Identifier shared by both sides.
    pub pair_id: PairId,
}

/// A dissolved binding, as returned by [`PairingTable::unbind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unbound {
    /// The former partner of the unbinding connection.
    pub partner: ConnectionId,
    /// Identifier the pair had.
    pub pair_id: PairId,
}

/// Active bindings, keyed by connection.
#[derive(Debug, Default)]
pub struct PairingTable {
    bindings: HashMap<ConnectionId, Binding>,
}

impl PairingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `a` and `b` under a fresh pair identifier.
    ///
    /// Fails without touching the table if either side is already bound,
    /// or if `a == b`.
    pub fn bind(&mut self, a: ConnectionId, b: ConnectionId) -> Result<PairId, PairingError> {
        if a == b {
            return Err(PairingError::SelfPairing);
        }
        if self.bindings.contains_key(&a) || self.bindings.contains_key(&b) {
            return Err(PairingError::AlreadyBound);
        }

        let pair_id = PairId::new();
        self.bindings.insert(
            a,
            Binding {
                partner: b,
                pair_id,
            },
        );
        self.bindings.insert(
            b,
            Binding {
                partner: a,
                pair_id,
            },
        );
        Ok(pair_id)
    }

    /// Partner of `connection`.
    pub fn partner_of(&self, connection: ConnectionId) -> Result<ConnectionId, PairingError> {
        self.bindings
            .get(&connection)
            .map(|binding| binding.partner)
            .ok_or(PairingError::NotBound)
    }

    /// Pair identifier of `connection`.
    pub fn pair_id_of(&self, connection: ConnectionId) -> Result<PairId, PairingError> {
        self.bindings
            .get(&connection)
            .map(|binding| binding.pair_id)
            .ok_or(PairingError::NotBound)
    }

    /// Whether `connection` is bound.
    pub fn is_bound(&self, connection: ConnectionId) -> bool {
        self.bindings.contains_key(&connection)
    }

    /// Remove both directions of the binding containing `connection`.
    pub fn unbind(&mut self, connection: ConnectionId) -> Result<Unbound, PairingError> {
        let binding = self
            .bindings
            .remove(&connection)
            .ok_or(PairingError::NotBound)?;

        if self.bindings.remove(&binding.partner).is_none() {
            tracing::error!(
                "Half binding: {:?} pointed at {:?} which had no entry",
                connection,
                binding.partner
            );
        }

        Ok(Unbound {
            partner: binding.partner,
            pair_id: binding.pair_id,
        })
    }

    /// Number of bound pairs.
    pub fn pair_count(&self) -> usize {
        self.bindings.len() / 2
    }
}
