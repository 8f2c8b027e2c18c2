//! # Session Encryption
//!
//! XChaCha20-Poly1305 sealing for per-connection sessions.
//!
//! A sealed frame is `nonce (24 bytes) || ciphertext || tag (16 bytes)`, so
//! each frame is self-contained and frames may be opened in any order.

use crate::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce length of XChaCha20 in bytes.
pub const NONCE_LENGTH: usize = 24;

/// Poly1305 authentication tag length in bytes.
const TAG_LENGTH: usize = 16;

/// Symmetric session key (256-bit), shared by both ends of a connection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Seal `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns `CryptoError::Seal` if the AEAD rejects the input.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_LENGTH];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Seal(e.to_string()))?;

    let mut frame = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Open a frame produced by [`seal`].
///
/// # Errors
///
/// - `CryptoError::FrameTooShort` if the frame cannot hold nonce and tag
/// - `CryptoError::Open` on a wrong key or tampered frame
pub fn open(key: &SessionKey, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < NONCE_LENGTH + TAG_LENGTH {
        return Err(CryptoError::FrameTooShort(frame.len()));
    }

    let (nonce, ciphertext) = frame.split_at(NONCE_LENGTH);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::Open(e.to_string()))
}
