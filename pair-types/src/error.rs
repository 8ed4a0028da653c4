//! Error types for pairloc wire handling.

use thiserror::Error;

/// Errors that can occur while parsing or encoding wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// Pairing code is not exactly six ASCII digits
    #[error("invalid pairing code: {0:?}")]
    InvalidCode(String),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack serialization failed
    #[error("msgpack encode failed: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("msgpack decode failed: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}
