//! Application-facing operations of [`Swarm`].

use async_trait::async_trait;
use shared_crypto::PublicKey;

use super::core::Swarm;
use crate::domain::SwarmError;
use crate::ports::{PeerEventStream, ProtocolEndpoint, SwarmApi};

impl Swarm {
    /// Register a protocol and get its receiving endpoint.
    ///
    /// Allowed before `start`. Registering a name again closes the previous
    /// endpoint. After shutdown the returned endpoint is already ended.
    pub fn register_protocol(&self, name: &str) -> ProtocolEndpoint {
        let endpoint = self.inner.router.register(name);
        if self.inner.is_shut_down() {
            self.inner.router.close_all();
        }
        endpoint
    }

    /// Send `payload` to `recipient` under `protocol`.
    ///
    /// # Errors
    ///
    /// - `NoRoute` if the key is neither a known peer nor resolvable
    /// - `DialFailed` if the connection cannot be established
    /// - `NoSession`, `Encode`, `Encrypt` or `Transport` on later stages
    /// - `ShuttingDown` after shutdown
    pub async fn send_message(
        &self,
        recipient: &PublicKey,
        protocol: &str,
        payload: Vec<u8>,
    ) -> Result<(), SwarmError> {
        self.inner.send_message(recipient, protocol, payload).await
    }

    /// Streams of `(connected, disconnected)` peer events.
    pub fn subscribe_peer_events(&self) -> (PeerEventStream, PeerEventStream) {
        self.inner.peer_events.subscribe()
    }

    /// Drop `peer` from the directory and close its connection.
    ///
    /// Dropping an outgoing peer triggers a replenishment round. Unknown
    /// keys are ignored.
    pub fn disconnect(&self, peer: &PublicKey) {
        self.inner.disconnect(peer);
    }
}

#[async_trait]
impl SwarmApi for Swarm {
    fn start(&self) -> Result<(), SwarmError> {
        Swarm::start(self)
    }

    fn shutdown(&self) {
        Swarm::shutdown(self)
    }

    fn register_protocol(&self, name: &str) -> ProtocolEndpoint {
        Swarm::register_protocol(self, name)
    }

    async fn send_message(
        &self,
        recipient: &PublicKey,
        protocol: &str,
        payload: Vec<u8>,
    ) -> Result<(), SwarmError> {
        Swarm::send_message(self, recipient, protocol, payload).await
    }

    fn subscribe_peer_events(&self) -> (PeerEventStream, PeerEventStream) {
        Swarm::subscribe_peer_events(self)
    }

    fn disconnect(&self, peer: &PublicKey) {
        Swarm::disconnect(self, peer)
    }

    async fn wait_initial_peers(&self) -> Result<(), SwarmError> {
        Swarm::wait_initial_peers(self).await
    }
}
