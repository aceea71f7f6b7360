use etherlight_rlp::error::RLPDecodeError;
use thiserror::Error;

/// The user-facing error taxonomy. Node-local failures (handshake, decode,
/// status mismatch, isolated timeouts) never surface here; a request only
/// fails with one of these after the retry policy is exhausted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LesError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Handshake failed")]
    HandshakeFailed,
    #[error("Peer status incompatible")]
    StatusIncompatible,
    #[error("Request timed out")]
    PeerTimeout,
    #[error("Peer disconnected")]
    PeerDisconnected,
    #[error("No peers available")]
    NoPeersAvailable,
    #[error("Insufficient request credit")]
    InsufficientCredit,
    #[error("Cancelled")]
    Cancelled,
    #[error("Internal invariant violated: {0}")]
    InternalAssertion(String),
}

impl From<RLPDecodeError> for LesError {
    fn from(err: RLPDecodeError) -> Self {
        LesError::Decode(err.to_string())
    }
}
