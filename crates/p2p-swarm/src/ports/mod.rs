//! Ports layer (hexagonal architecture).

pub mod inbound;
pub mod outbound;

pub use inbound::{PeerEventStream, ProtocolEndpoint, SwarmApi};
pub use outbound::{
    Connection, ConnectionDirection, ConnectionId, ConnectionPool, PeerSelector, PoolEvent,
    SelectionError, Session, SessionError, TimeSource, TransportError,
};
