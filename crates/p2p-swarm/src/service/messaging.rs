//! Outbound message path.

use std::sync::Arc;

use shared_crypto::PublicKey;
use tracing::debug;

use super::core::SwarmInner;
use crate::domain::{ProtocolMessage, SwarmError};
use crate::ports::Connection;

impl SwarmInner {
    /// Sign, encode, encrypt and write `payload` to `recipient`.
    pub(crate) async fn send_message(
        &self,
        recipient: &PublicKey,
        protocol: &str,
        payload: Vec<u8>,
    ) -> Result<(), SwarmError> {
        if self.is_shut_down() {
            return Err(SwarmError::ShuttingDown);
        }

        let connection = self.connection_for(recipient).await?;
        let session = connection.session().ok_or(SwarmError::NoSession)?;

        let message = ProtocolMessage::signed(&self.identity, protocol, self.clock.now(), payload)
            .map_err(|e| SwarmError::Encode(e.to_string()))?;
        let encoded = message
            .encode()
            .map_err(|e| SwarmError::Encode(e.to_string()))?;
        let sealed = session
            .encrypt(&encoded)
            .map_err(|e| SwarmError::Encrypt(e.to_string()))?;

        connection
            .send(sealed)
            .await
            .map_err(|e| SwarmError::Transport(e.to_string()))?;

        debug!(
            peer = %recipient.short(),
            protocol,
            len = encoded.len(),
            "Message sent"
        );
        Ok(())
    }

    /// Live connection to `recipient`, dialing if needed.
    ///
    /// Keys absent from the peer directory are resolved through peer
    /// selection before any dial.
    async fn connection_for(&self, recipient: &PublicKey) -> Result<Arc<dyn Connection>, SwarmError> {
        if let Some(existing) = self.pool.existing_connection(recipient) {
            return Ok(existing);
        }

        let known = self.directory.read().get(recipient).cloned();
        let target = match known {
            Some(node) => node,
            None => self
                .selector
                .lookup(recipient)
                .await
                .ok_or(SwarmError::NoRoute(*recipient))?,
        };

        self.pool
            .get_connection(target.address(), recipient)
            .await
            .map_err(|e| SwarmError::DialFailed(e.to_string()))
    }
}
