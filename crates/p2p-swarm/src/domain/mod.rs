//! Domain layer: identities, wire message, peer bookkeeping and errors.
//!
//! Nothing in here performs I/O.

pub mod config;
pub mod errors;
pub mod events;
pub mod identity;
pub mod message;
pub mod peer_directory;

pub use config::{SwarmConfig, DEFAULT_LISTEN_PORT};
pub use errors::{ConfigError, FormatStage, SwarmError};
pub use events::{PeerEvent, PeerEventKind};
pub use identity::{NodeIdentity, NodeInfo};
pub use message::{InboundMessage, MessageError, ProtocolMessage, Timestamp, MAX_MESSAGE_SIZE};
pub use peer_directory::{Admission, PeerDirection, PeerDirectory};
