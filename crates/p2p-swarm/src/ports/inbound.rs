//! # Driving Ports (Inbound API)
//!
//! What the application sees of the swarm: protocol endpoints, peer event
//! streams and the [`SwarmApi`] trait.

use async_trait::async_trait;
use shared_crypto::PublicKey;
use tokio::sync::mpsc;

use crate::domain::{InboundMessage, PeerEvent, SwarmError};

/// Receiving side of a registered protocol.
///
/// Yields validated messages in arrival order per sender. Ends when the
/// protocol is re-registered or the swarm shuts down.
#[derive(Debug)]
pub struct ProtocolEndpoint {
    name: String,
    receiver: mpsc::Receiver<InboundMessage>,
}

impl ProtocolEndpoint {
    pub(crate) fn new(name: impl Into<String>, receiver: mpsc::Receiver<InboundMessage>) -> Self {
        Self {
            name: name.into(),
            receiver,
        }
    }

    /// Protocol name this endpoint was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next message, or `None` once the endpoint is closed.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    /// Next message if one is queued.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.receiver.try_recv().ok()
    }
}

/// One direction (connected or disconnected) of a peer event subscription.
#[derive(Debug)]
pub struct PeerEventStream {
    receiver: mpsc::Receiver<PeerEvent>,
}

impl PeerEventStream {
    pub(crate) fn new(receiver: mpsc::Receiver<PeerEvent>) -> Self {
        Self { receiver }
    }

    /// Next event, or `None` once the swarm shuts down.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Public operations of a swarm.
#[async_trait]
pub trait SwarmApi: Send + Sync {
    /// Start background tasks. Must run inside a Tokio runtime.
    fn start(&self) -> Result<(), SwarmError>;

    /// Stop everything. Idempotent, safe before `start`.
    fn shutdown(&self);

    /// Register a protocol; a second registration replaces the first.
    fn register_protocol(&self, name: &str) -> ProtocolEndpoint;

    /// Sign, encrypt and send `payload` to `recipient` under `protocol`.
    async fn send_message(
        &self,
        recipient: &PublicKey,
        protocol: &str,
        payload: Vec<u8>,
    ) -> Result<(), SwarmError>;

    /// Streams of `(connected, disconnected)` peer events.
    fn subscribe_peer_events(&self) -> (PeerEventStream, PeerEventStream);

    /// Drop a peer and close its connection.
    fn disconnect(&self, peer: &PublicKey);

    /// Resolves once the initial outgoing neighborhood is established.
    async fn wait_initial_peers(&self) -> Result<(), SwarmError>;
}
