//! # Shared Crypto - Overlay Cryptographic Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `signatures` | Ed25519 | Node identity, message authentication |
//! | `symmetric` | XChaCha20-Poly1305 | Per-connection session encryption |
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency when signing
//! - **XChaCha20**: 192-bit random nonce per sealed frame, constant-time

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod signatures;
pub mod symmetric;

// Re-exports
pub use errors::CryptoError;
pub use signatures::{NodeKeyPair, PublicKey, Signature, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
pub use symmetric::{open, seal, SessionKey, NONCE_LENGTH};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
