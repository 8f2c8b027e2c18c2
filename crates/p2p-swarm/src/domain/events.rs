//! Peer lifecycle events.

use shared_crypto::PublicKey;

/// Kind of peer lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEventKind {
    Connected,
    Disconnected,
}

/// A peer joined or left the peer directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEvent {
    pub kind: PeerEventKind,
    pub peer: PublicKey,
}

impl PeerEvent {
    pub fn connected(peer: PublicKey) -> Self {
        Self {
            kind: PeerEventKind::Connected,
            peer,
        }
    }

    pub fn disconnected(peer: PublicKey) -> Self {
        Self {
            kind: PeerEventKind::Disconnected,
            peer,
        }
    }
}
