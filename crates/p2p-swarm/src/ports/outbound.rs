//! # Driven Ports (Outbound SPI)
//!
//! Collaborators the swarm requires but does not implement: the encrypted
//! session of a link, the link itself, the connection pool that dials and
//! accepts links, peer selection, and the clock.
//!
//! In-memory implementations live in [`crate::adapters`]; scripted mocks in
//! `test_utils`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use shared_crypto::PublicKey;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{NodeInfo, Timestamp};

// =============================================================================
// SESSION
// =============================================================================

/// Errors from a session cipher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Symmetric encryption negotiated for a single connection.
pub trait Session: Send + Sync {
    /// Seal an outgoing message.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError>;

    /// Open an incoming frame.
    fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>, SessionError>;
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Identifier of a connection, unique within a pool.
pub type ConnectionId = u64;

/// Errors from the transport layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("address unreachable: {0}")]
    Unreachable(String),
    #[error("node at {address} does not hold the expected key")]
    IdentityMismatch { address: String },
    #[error("address already in use: {0}")]
    AddressInUse(String),
    #[error("connection closed")]
    Closed,
    #[error("connection pool shut down")]
    PoolShutdown,
}

/// An established, authenticated link to one remote node.
///
/// Frames are delivered in order; the inbound side of the link is handed to
/// the swarm through [`PoolEvent::Opened`].
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Public key the remote proved during the handshake.
    fn remote_public_key(&self) -> PublicKey;

    fn remote_address(&self) -> &str;

    /// Which side dialed. A reused link keeps the direction it was opened
    /// with.
    fn direction(&self) -> ConnectionDirection;

    /// Session cipher, absent until the handshake completes.
    fn session(&self) -> Option<Arc<dyn Session>>;

    /// Write one frame. Waits while the remote's inbound queue is full.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Close the link. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Resolves once the link is closed by either side.
    async fn closed(&self);
}

// =============================================================================
// CONNECTION POOL
// =============================================================================

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    /// We dialed
    Outbound,
    /// The remote dialed us
    Inbound,
}

/// Notifications from the pool.
pub enum PoolEvent {
    /// A connection was established. `inbound` yields the frames the remote
    /// writes, in order, and ends when the link closes.
    Opened {
        connection: Arc<dyn Connection>,
        direction: ConnectionDirection,
        inbound: mpsc::Receiver<Vec<u8>>,
    },
}

impl fmt::Debug for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened {
                connection,
                direction,
                ..
            } => f
                .debug_struct("Opened")
                .field("id", &connection.id())
                .field("remote", &connection.remote_public_key())
                .field("direction", direction)
                .finish_non_exhaustive(),
        }
    }
}

/// Dials, accepts and caches connections keyed by remote public key.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Reuse a live connection to `remote` or dial `address`.
    ///
    /// Concurrent calls for the same key must share one dial.
    async fn get_connection(
        &self,
        address: &str,
        remote: &PublicKey,
    ) -> Result<Arc<dyn Connection>, TransportError>;

    /// Live connection to `remote`, if any. Never dials.
    fn existing_connection(&self, remote: &PublicKey) -> Option<Arc<dyn Connection>>;

    /// Stream of pool events. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PoolEvent>>;

    /// Close every connection and stop accepting new ones.
    fn shutdown(&self);
}

// =============================================================================
// PEER SELECTION
// =============================================================================

/// Errors from peer selection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no bootstrap nodes available")]
    NoBootstrapNodes,
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}

/// Source of candidate peers and address lookups (typically a DHT).
#[async_trait]
pub trait PeerSelector: Send + Sync {
    /// Up to `count` random known nodes.
    async fn select_peers(&self, count: usize) -> Vec<NodeInfo>;

    /// Resolve a public key to an address.
    async fn lookup(&self, key: &PublicKey) -> Option<NodeInfo>;

    /// Populate the selector from well-known nodes.
    async fn bootstrap(&self) -> Result<(), SelectionError>;

    /// Record a node seen on the network.
    fn update(&self, node: NodeInfo);

    /// Mark a known node as recently active.
    fn touch(&self, key: &PublicKey);
}

// =============================================================================
// TIME
// =============================================================================

/// Wall clock used to validate message timestamps.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}
