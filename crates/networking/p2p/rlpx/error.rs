use etherlight_rlp::error::{RLPDecodeError, RLPEncodeError};
use thiserror::Error;

/// Transport-level failures. These close the offending peer session but are
/// never surfaced to API callers directly.
#[derive(Debug, Error)]
pub(crate) enum RLPxError {
    #[error("{0}")]
    HandshakeError(String),
    #[error("Invalid connection state")]
    InvalidState(),
    #[error("Decode Error: {0}")]
    DecodeError(#[from] RLPDecodeError),
    #[error("Encode Error: {0}")]
    EncodeError(#[from] RLPEncodeError),
    #[error("Invalid peer id")]
    InvalidPeerId(),
    #[error("Invalid recovery id")]
    InvalidRecoveryId(),
    #[error("Invalid message length")]
    InvalidMessageLength(),
    #[error("Frame MAC check failed")]
    InvalidMac(),
    #[error("Incompatible status: {0}")]
    StatusMismatch(String),
    #[error("Cryptography Error: {0}")]
    CryptographyError(String),
    #[error("Connection Error: {0}")]
    ConnectionError(String),
    #[error("Not Found: {0}")]
    NotFound(String),
}

impl From<k256::ecdsa::Error> for RLPxError {
    fn from(e: k256::ecdsa::Error) -> Self {
        RLPxError::CryptographyError(e.to_string())
    }
}

impl From<k256::elliptic_curve::Error> for RLPxError {
    fn from(e: k256::elliptic_curve::Error) -> Self {
        RLPxError::CryptographyError(e.to_string())
    }
}

impl From<aes::cipher::InvalidLength> for RLPxError {
    fn from(e: aes::cipher::InvalidLength) -> Self {
        RLPxError::CryptographyError(e.to_string())
    }
}

impl From<aes::cipher::StreamCipherError> for RLPxError {
    fn from(e: aes::cipher::StreamCipherError) -> Self {
        RLPxError::CryptographyError(e.to_string())
    }
}

impl From<std::io::Error> for RLPxError {
    fn from(e: std::io::Error) -> Self {
        RLPxError::ConnectionError(e.to_string())
    }
}
