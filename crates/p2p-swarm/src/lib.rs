//! # P2P Swarm
//!
//! The overlay layer of a node: authenticated, encrypted links to a
//! target-sized set of neighbors, with application protocols multiplexed
//! over them.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** identities, the signed wire message, the peer
//!   directory, configuration and errors
//! - **Ports Layer:** the swarm API and the collaborators it drives
//!   (connection pool, session, peer selection, clock)
//! - **Service Layer:** [`Swarm`], the receive pipeline, protocol router and
//!   neighborhood manager
//! - **Adapters Layer:** an in-process transport, an address book and the
//!   system clock
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use p2p_swarm::{AddressBook, MemoryNetwork, NodeIdentity, Swarm, SwarmConfig};
//!
//! let network = MemoryNetwork::new();
//! let identity = NodeIdentity::generate("mem:alice");
//! let pool = network.bind(identity.node_info())?;
//! let book = AddressBook::new(identity.public_key());
//!
//! let swarm = Swarm::new(SwarmConfig::default(), identity, Arc::new(pool), Arc::new(book))?;
//! let mut chat = swarm.register_protocol("chat/1");
//! swarm.start()?;
//!
//! while let Some(msg) = chat.recv().await {
//!     println!("{} says {:?}", msg.sender().short(), msg.bytes());
//! }
//! ```
//!
//! ## Logging
//!
//! Emits `tracing` events; installing a subscriber is up to the binary.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

/// Scripted port implementations.
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use domain::{
    Admission, ConfigError, FormatStage, InboundMessage, MessageError, NodeIdentity, NodeInfo,
    PeerDirection, PeerDirectory, PeerEvent, PeerEventKind, ProtocolMessage, SwarmConfig,
    SwarmError, Timestamp, DEFAULT_LISTEN_PORT, MAX_MESSAGE_SIZE,
};

pub use ports::{
    Connection, ConnectionDirection, ConnectionId, ConnectionPool, PeerEventStream, PeerSelector,
    PoolEvent, ProtocolEndpoint, SelectionError, Session, SessionError, SwarmApi, TimeSource,
    TransportError,
};

pub use service::Swarm;

pub use adapters::{
    AddressBook, CipherSession, MemoryConnection, MemoryConnectionPool, MemoryNetwork,
    SystemTimeSource,
};

pub use shared_crypto::{NodeKeyPair, PublicKey};
