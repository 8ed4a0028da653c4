//! # pair-types
//!
//! Wire format types for the pairloc location relay.
//!
//! This crate provides the types shared by the relay and its clients:
//! - [`ConnectionId`], [`PairId`], [`PairingCode`] - Identity types
//! - [`Command`] - Named events a device sends to the relay
//! - [`Event`] - Named events the relay sends to a device
//! - [`LocationPayload`], [`LocationData`] - Relayed location updates
//! - [`WireError`] - Error types
//!
//! Every frame is a named event with an optional payload:
//!
//! ```text
//! {"event": "pair_with_code", "data": "482913"}
//! {"event": "pairing_result", "data": {"success": true, "message": "...", "pairId": "..."}}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::WireError;
pub use ids::{ConnectionId, PairId, PairingCode, CODE_LEN, CODE_SPACE};
pub use messages::{
    Command, ErrorNotice, Event, LocationData, LocationPayload, PairingResult,
};
