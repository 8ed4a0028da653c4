//! # pair-relay
//!
//! Pairing and location relay for two devices sharing live location.
//!
//! This crate implements a relay server that:
//! - Accepts WebSocket connections from devices
//! - Issues short-lived six-digit pairing codes
//! - Binds two connections into a pair when one redeems the other's code
//! - Forwards location updates from a device to its partner, never stored
//! - Tells the partner when a device unpairs or disconnects
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐                    ┌── Device B
//!            │     WebSocket      │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │         pair-relay         │
//!        │  ┌──────────┐ ┌────────┐   │
//!        │  │  codes   │ │ pairs  │   │
//!        │  └──────────┘ └────────┘   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Frames are `{"event": ..., "data": ...}` objects, JSON text by default
//! or MessagePack binary with `?format=msgpack`:
//! - generate_code → pairing_code
//! - pair_with_code → pairing_result (to both devices)
//! - location_update → partner_location (to the partner)
//! - unpair → unpair_success, partner_unpaired
//! - disconnect → partner_disconnected

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod codes;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod table;
