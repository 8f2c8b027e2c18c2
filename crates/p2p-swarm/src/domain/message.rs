//! # Protocol Message
//!
//! The authenticated unit of application traffic carried inside a session.
//!
//! ## Wire Format
//!
//! ```text
//! ProtocolMessage {
//!   sender:    bytes   (32-byte Ed25519 public key)
//!   protocol:  string
//!   timestamp: i64     (unix seconds)
//!   signature: bytes   (64 bytes, over sender/protocol/timestamp/payload)
//!   payload:   bytes
//! }
//! ```
//!
//! Encoded with bincode (varint integers, bounded size, no trailing bytes).

use bincode::Options;
use serde::{Deserialize, Serialize};
use shared_crypto::{NodeKeyPair, PublicKey, Signature};
use thiserror::Error;

use crate::domain::NodeIdentity;

/// Upper bound on an encoded message (4 MiB).
pub const MAX_MESSAGE_SIZE: u64 = 4 * 1024 * 1024;

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_SIZE)
}

/// Unix time in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create from unix seconds.
    pub fn new(secs: i64) -> Self {
        Self(secs)
    }

    /// Unix seconds.
    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Signed distance `self - other` in seconds.
    pub fn drift_from(&self, other: Timestamp) -> i64 {
        self.0.saturating_sub(other.0)
    }

    /// Shift by `secs` (negative moves into the past).
    pub fn offset(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

/// Failures while building, encoding or authenticating a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Serialization failed
    #[error("encode failed: {0}")]
    Encode(String),
    /// Bytes are not a protocol message
    #[error("decode failed: {0}")]
    Decode(String),
    /// Sender field is not a valid public key
    #[error("invalid sender key")]
    InvalidSender,
    /// Signature missing, malformed, or not made by the sender
    #[error("signature does not match sender")]
    BadSignature,
}

/// Signed protocol message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Claimed author's public key.
    pub sender: Vec<u8>,
    /// Name of the destination protocol.
    pub protocol: String,
    /// Creation time in unix seconds.
    pub timestamp: i64,
    /// Signature over the other four fields.
    pub signature: Vec<u8>,
    /// Application bytes.
    pub payload: Vec<u8>,
}

/// The fields covered by the signature, in signing order.
#[derive(Serialize)]
struct SignedFields<'a> {
    sender: &'a [u8],
    protocol: &'a str,
    timestamp: i64,
    payload: &'a [u8],
}

impl ProtocolMessage {
    /// Build an unsigned message.
    pub fn new(
        sender: PublicKey,
        protocol: impl Into<String>,
        timestamp: Timestamp,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sender: sender.to_vec(),
            protocol: protocol.into(),
            timestamp: timestamp.as_secs(),
            signature: Vec::new(),
            payload,
        }
    }

    /// Build and sign a message authored by the local node.
    pub fn signed(
        identity: &NodeIdentity,
        protocol: impl Into<String>,
        timestamp: Timestamp,
        payload: Vec<u8>,
    ) -> Result<Self, MessageError> {
        let mut message = Self::new(identity.public_key(), protocol, timestamp, payload);
        let signature = identity.sign(&message.signing_bytes()?);
        message.signature = signature.to_vec();
        Ok(message)
    }

    /// Sign (or re-sign) with `keypair`, replacing any previous signature.
    pub fn sign(&mut self, keypair: &NodeKeyPair) -> Result<(), MessageError> {
        let signature = keypair.sign(&self.signing_bytes()?);
        self.signature = signature.to_vec();
        Ok(())
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let fields = SignedFields {
            sender: &self.sender,
            protocol: &self.protocol,
            timestamp: self.timestamp,
            payload: &self.payload,
        };
        codec()
            .serialize(&fields)
            .map_err(|e| MessageError::Encode(e.to_string()))
    }

    /// Verify the signature against the claimed sender.
    ///
    /// Returns the authenticated author on success.
    pub fn verify_author(&self) -> Result<PublicKey, MessageError> {
        let sender = PublicKey::from_slice(&self.sender).map_err(|_| MessageError::InvalidSender)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| MessageError::BadSignature)?;
        sender
            .verify(&self.signing_bytes()?, &signature)
            .map_err(|_| MessageError::BadSignature)?;
        Ok(sender)
    }

    /// Message creation time.
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.timestamp)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        codec()
            .serialize(self)
            .map_err(|e| MessageError::Encode(e.to_string()))
    }

    /// Decode from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        codec()
            .deserialize(bytes)
            .map_err(|e| MessageError::Decode(e.to_string()))
    }
}

/// A validated message delivered to a protocol endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    sender: PublicKey,
    protocol: String,
    payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a delivery record.
    pub fn new(sender: PublicKey, protocol: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            sender,
            protocol: protocol.into(),
            payload,
        }
    }

    /// Authenticated author.
    pub fn sender(&self) -> &PublicKey {
        &self.sender
    }

    /// Protocol the message was addressed to.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
