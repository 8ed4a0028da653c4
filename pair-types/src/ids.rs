//! Identity types for pairloc.

use crate::WireError;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of digits in a pairing code.
pub const CODE_LEN: usize = 6;

/// Number of distinct pairing codes (`000000` through `999999`).
pub const CODE_SPACE: u32 = 1_000_000;

/// Identifies one live transport session between a device and the relay.
///
/// Assigned by the relay when the connection is accepted. Carries no
/// meaning beyond the lifetime of that connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Create a new random ConnectionId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", &self.to_string()[..8])
    }
}

/// Opaque token shared by the two connections of a bound pair.
///
/// Devices persist it to scope their local location history, so it is
/// always serialized as the hyphenated UUID string, in every encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(uuid::Uuid);

impl PairId {
    /// Create a new random PairId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for PairId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairId({})", self.0)
    }
}

impl FromStr for PairId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl Serialize for PairId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PairId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A short-lived, single-use six digit code that introduces two devices.
///
/// Leading zeros are significant: `"004211"` is a valid code distinct
/// from `"4211"` (which is not a code at all).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairingCode(String);

impl PairingCode {
    /// Parse user input into a code.
    ///
    /// Surrounding whitespace is ignored; the rest must be exactly
    /// [`CODE_LEN`] ASCII digits.
    pub fn parse(input: &str) -> Result<Self, WireError> {
        let trimmed = input.trim();
        if trimmed.len() == CODE_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(WireError::InvalidCode(input.to_string()))
        }
    }

    /// Draw a code uniformly from the full code space.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_index(rng.gen_range(0..CODE_SPACE))
    }

    /// Build the code for a position in the code space.
    ///
    /// Values outside the space wrap around.
    pub fn from_index(index: u32) -> Self {
        Self(format!("{:0width$}", index % CODE_SPACE, width = CODE_LEN))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingCode({})", self.0)
    }
}

impl TryFrom<String> for PairingCode {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PairingCode> for String {
    fn from(code: PairingCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn connection_id_debug_is_short() {
        let id = ConnectionId::new();
        let debug = format!("{:?}", id);
        assert_eq!(debug.len(), "ConnectionId()".len() + 8);
    }

    #[test]
    fn pair_id_serializes_as_string_in_msgpack() {
        let id = PairId::new();
        let bytes = rmp_serde::to_vec(&id).unwrap();
        let as_string: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(as_string, id.to_string());

        let restored: PairId = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, id);
    }

    #[test]
    fn pair_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<PairId>().is_err());
        assert!(serde_json::from_str::<PairId>("\"nope\"").is_err());
    }

    #[test]
    fn code_parse_accepts_six_digits() {
        let code = PairingCode::parse("482913").unwrap();
        assert_eq!(code.as_str(), "482913");
    }

    #[test]
    fn code_parse_trims_whitespace() {
        let code = PairingCode::parse("  004211\n").unwrap();
        assert_eq!(code.as_str(), "004211");
    }

    #[test]
    fn code_parse_rejects_bad_input() {
        for bad in ["", "12345", "1234567", "12a456", "１２３４５６", "-12345", "12 345"] {
            assert!(PairingCode::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn code_from_index_keeps_leading_zeros() {
        assert_eq!(PairingCode::from_index(0).as_str(), "000000");
        assert_eq!(PairingCode::from_index(42).as_str(), "000042");
        assert_eq!(PairingCode::from_index(999_999).as_str(), "999999");
        assert_eq!(PairingCode::from_index(CODE_SPACE + 7).as_str(), "000007");
    }

    #[test]
    fn random_codes_are_six_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let code = PairingCode::random(&mut rng);
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn code_deserialize_validates() {
        let ok: PairingCode = serde_json::from_str("\"123456\"").unwrap();
        assert_eq!(ok.as_str(), "123456");
        assert!(serde_json::from_str::<PairingCode>("\"12345\"").is_err());
    }
}
