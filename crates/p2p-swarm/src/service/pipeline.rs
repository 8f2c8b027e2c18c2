//! # Receive Pipeline
//!
//! Turns one raw inbound frame into a delivered protocol message.
//!
//! ## Stages (first failure wins)
//!
//! 1. Frame present and non-empty, else `BadFormat(PreSession)` (fatal)
//! 2. Connection has a session, else `NoSession`
//! 3. Session decrypts the frame, else `FailDecrypt`
//! 4. Plaintext decodes to a protocol message, else `BadFormat(PostSession)`
//! 5. Timestamp within the skew window, else `OutOfSync`
//! 6. Signature verifies against the claimed sender, else `AuthFailure`
//! 7. Protocol is registered, else `NoProtocol`
//! 8. Deliver `{sender, payload}` to the protocol endpoint

use tracing::trace;

use super::core::SwarmInner;
use crate::domain::{FormatStage, InboundMessage, ProtocolMessage, SwarmError, Timestamp};
use crate::ports::Connection;

/// A message that passed stages 1 to 6.
#[derive(Debug)]
pub(crate) struct Authenticated {
    pub(crate) sender: shared_crypto::PublicKey,
    pub(crate) message: ProtocolMessage,
}

/// Stages 1 to 6: everything that does not depend on swarm state.
pub(crate) fn authenticate(
    frame: &[u8],
    connection: &dyn Connection,
    now: Timestamp,
    skew_tolerance_secs: i64,
) -> Result<Authenticated, SwarmError> {
    if frame.is_empty() {
        return Err(SwarmError::BadFormat(FormatStage::PreSession));
    }

    let session = connection.session().ok_or(SwarmError::NoSession)?;
    let plaintext = session
        .decrypt(frame)
        .map_err(|_| SwarmError::FailDecrypt)?;

    let message = ProtocolMessage::decode(&plaintext)
        .map_err(|_| SwarmError::BadFormat(FormatStage::PostSession))?;

    let drift_secs = message.timestamp().drift_from(now);
    if drift_secs.unsigned_abs() > skew_tolerance_secs.unsigned_abs() {
        return Err(SwarmError::OutOfSync { drift_secs });
    }

    let sender = message
        .verify_author()
        .map_err(|_| SwarmError::AuthFailure)?;

    Ok(Authenticated { sender, message })
}

impl SwarmInner {
    /// Validate and route one inbound frame.
    ///
    /// Waits while the destination protocol's queue is full; returns
    /// `ShuttingDown` if the swarm stops while waiting.
    pub(crate) async fn on_remote_message(
        &self,
        connection: &dyn Connection,
        frame: &[u8],
    ) -> Result<(), SwarmError> {
        let Authenticated { sender, message } = authenticate(
            frame,
            connection,
            self.clock.now(),
            self.config.clock_skew_tolerance(),
        )?;

        self.selector.touch(&sender);

        let endpoint = self
            .router
            .route(&message.protocol)
            .ok_or_else(|| SwarmError::NoProtocol(message.protocol.clone()))?;

        trace!(
            peer = %sender.short(),
            protocol = %message.protocol,
            len = message.payload.len(),
            "Delivering message"
        );

        let protocol = message.protocol;
        let delivery = InboundMessage::new(sender, protocol.clone(), message.payload);
        let mut shutdown = self.shutdown_signal();
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => Err(SwarmError::ShuttingDown),
            sent = endpoint.send(delivery) => sent.map_err(|_| SwarmError::NoProtocol(protocol)),
        }
    }
}
