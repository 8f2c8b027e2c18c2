//! Errors from key handling, signing and frame sealing.

use thiserror::Error;

/// Failure of a shared-crypto operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    // Keys and signatures
    /// Bytes are not a valid Ed25519 point, or not valid hex
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Key or signature bytes have the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Signature bytes do not have the Ed25519 layout
    #[error("malformed signature")]
    InvalidSignatureFormat,

    /// Signature does not match key and message
    #[error("bad signature")]
    BadSignature,

    // Session frames
    /// AEAD refused to seal the plaintext
    #[error("seal failed: {0}")]
    Seal(String),

    /// Wrong key or tampered frame
    #[error("open failed: {0}")]
    Open(String),

    /// Frame cannot hold a nonce and a tag
    #[error("sealed frame too short: {0} bytes")]
    FrameTooShort(usize),
}
