//! Error types for pair-relay.

use pair_types::WireError;

/// Startup and serve errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A setting from the file, the environment, or the command line is
    /// malformed.
    #[error("invalid {name} {value:?}: {reason}")]
    InvalidSetting {
        /// Name of the setting.
        name: &'static str,
        /// Value as given.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// I/O error, binding or serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pairing state errors.
///
/// `NotFound` and `SelfPairing` are user-facing and become a failed
/// `pairing_result`. `AlreadyBound` and `CodeSpaceExhausted` mean the
/// relay cannot pair right now and are logged. `NotBound` is never
/// reported to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PairingError {
    /// Code is unknown, already redeemed, or expired.
    #[error("pairing code not found or expired")]
    NotFound,

    /// The redeeming connection issued the code itself.
    #[error("cannot pair with self")]
    SelfPairing,

    /// One side of a requested binding is already bound.
    #[error("connection already bound")]
    AlreadyBound,

    /// The connection has no binding.
    #[error("connection not bound")]
    NotBound,

    /// Every code in the code space is live.
    #[error("pairing code space exhausted")]
    CodeSpaceExhausted,
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured size limit.
    #[error("message too large: {size} bytes (limit: {limit} bytes)")]
    MessageTooLarge {
        /// Actual size of the frame.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Frame could not be decoded or encoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },
}

/// Result type alias for startup and serve operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
