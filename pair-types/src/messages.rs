//! Named events exchanged between devices and the relay.
//!
//! Both directions use the same envelope: an `event` name and an optional
//! `data` payload. JSON text frames are the default encoding; MessagePack
//! (with named fields) is available for binary frames.

use serde::{Deserialize, Serialize};

use crate::{PairId, PairingCode, WireError};

/// Commands a device sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Command {
    /// Ask the relay for a fresh pairing code
    GenerateCode,
    /// Redeem a code issued to another device
    ///
    /// Kept as raw input; the relay validates the format and answers
    /// malformed codes with a failed pairing result.
    PairWithCode(String),
    /// Location update to forward to the partner
    LocationUpdate(LocationPayload),
    /// Dissolve the current pairing
    Unpair,
}

impl Command {
    /// Event name of this command on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GenerateCode => "generate_code",
            Self::PairWithCode(_) => "pair_with_code",
            Self::LocationUpdate(_) => "location_update",
            Self::Unpair => "unpair",
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a MessagePack binary frame.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, WireError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from a MessagePack binary frame.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Events the relay sends to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// A code was issued to this device
    PairingCode(PairingCode),
    /// Outcome of a pairing attempt
    PairingResult(PairingResult),
    /// The partner's latest location, exactly as the partner sent it
    PartnerLocation(LocationPayload),
    /// The partner dissolved the pairing
    PartnerUnpaired,
    /// The partner's connection went away; the pairing is dissolved
    PartnerDisconnected,
    /// This device's unpair request was processed
    UnpairSuccess,
    /// A frame could not be processed
    Error(ErrorNotice),
}

impl Event {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingCode(_) => "pairing_code",
            Self::PairingResult(_) => "pairing_result",
            Self::PartnerLocation(_) => "partner_location",
            Self::PartnerUnpaired => "partner_unpaired",
            Self::PartnerDisconnected => "partner_disconnected",
            Self::UnpairSuccess => "unpair_success",
            Self::Error(_) => "error",
        }
    }

    /// Shorthand for an [`Event::Error`].
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
        })
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a MessagePack binary frame.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, WireError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from a MessagePack binary frame.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Payload of a `pairing_result` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResult {
    /// Whether the devices are now paired
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Shared pair identifier, present only on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<PairId>,
}

impl PairingResult {
    /// Message carried by every successful result.
    pub const PAIRED: &'static str = "paired successfully";

    /// A successful result carrying the shared pair identifier.
    pub fn success(pair_id: PairId) -> Self {
        Self {
            success: true,
            message: Self::PAIRED.to_string(),
            pair_id: Some(pair_id),
        }
    }

    /// A failed result.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            pair_id: None,
        }
    }
}

/// Payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// What went wrong
    pub message: String,
}

/// A location update as sent by a device.
///
/// The relay never interprets the contents; it forwards the value to the
/// partner verbatim. Numbers are held as `i64`, `u64` or `f64`, so every
/// integer in the 64-bit range relays exactly, while a wider integer
/// arrives as the nearest `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationPayload(serde_json::Value);

impl LocationPayload {
    /// Wrap an arbitrary JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Build a payload from a typed location.
    pub fn from_location(location: &LocationData) -> Result<Self, WireError> {
        Ok(Self(serde_json::to_value(location)?))
    }

    /// Interpret the payload as a typed location.
    pub fn to_location(&self) -> Result<LocationData, WireError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// The raw JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consume the payload, returning the raw JSON value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Location fields used by the mobile app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationData {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Horizontal accuracy in metres
    #[serde(default)]
    pub accuracy: f32,
    /// Fix time in milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    /// Pair the update belongs to, as persisted by the device
    #[serde(default)]
    pub pair_id: String,
}
