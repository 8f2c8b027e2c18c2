//! Error types for the swarm.

use shared_crypto::PublicKey;
use std::fmt;
use thiserror::Error;

/// Where in the receive pipeline a malformed frame was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStage {
    /// Frame rejected before session decryption (empty or absent).
    PreSession,
    /// Decrypted bytes are not a protocol message.
    PostSession,
}

impl fmt::Display for FormatStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreSession => write!(f, "pre-session"),
            Self::PostSession => write!(f, "post-session"),
        }
    }
}

/// Swarm errors.
///
/// The receive pipeline reports exactly one variant per rejected frame,
/// checked in the order the variants appear below.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwarmError {
    #[error("Bad message format ({0})")]
    BadFormat(FormatStage),

    #[error("No session on connection")]
    NoSession,

    #[error("Failed to decrypt message")]
    FailDecrypt,

    #[error("Message timestamp out of sync by {drift_secs}s")]
    OutOfSync { drift_secs: i64 },

    #[error("Failed to authenticate message author")]
    AuthFailure,

    #[error("No handler registered for protocol {0:?}")]
    NoProtocol(String),

    #[error("No route to peer {0}")]
    NoRoute(PublicKey),

    #[error("Dial failed: {0}")]
    DialFailed(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to encrypt message: {0}")]
    Encrypt(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Swarm already running")]
    AlreadyRunning,

    #[error("Swarm is shutting down")]
    ShuttingDown,
}

impl SwarmError {
    /// Whether the connection that produced this error must be closed.
    ///
    /// Only a frame that is malformed before any session processing is
    /// treated as a broken link; every other failure drops the frame and
    /// keeps the connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::BadFormat(FormatStage::PreSession))
    }
}

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}
