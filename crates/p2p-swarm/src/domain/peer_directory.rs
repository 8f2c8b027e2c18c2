//! # Peer Directory
//!
//! Tracks the peers the local node is currently linked with, split by who
//! initiated the link.
//!
//! ## Invariants
//!
//! - A public key is in at most one of the two sets.
//! - An incoming peer is never promoted to outgoing: a later dial to the
//!   same key is reported as [`Admission::AlreadyIncoming`] and dropped.
//!
//! The directory itself is a plain value; the swarm wraps it in a
//! reader-writer lock so membership checks and the matching peer event are
//! one atomic step.

use std::collections::HashMap;

use shared_crypto::PublicKey;

use super::NodeInfo;

// =============================================================================
// TYPES
// =============================================================================

/// Which side initiated the link to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDirection {
    /// The remote node dialed us
    Incoming,
    /// We dialed the remote node
    Outgoing,
}

/// Result of trying to add a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Peer was not known and has been added
    Added,
    /// Peer is already linked as incoming
    AlreadyIncoming,
    /// Peer is already linked as outgoing
    AlreadyOutgoing,
}

impl Admission {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added)
    }
}

// =============================================================================
// PEER DIRECTORY
// =============================================================================

/// Incoming and outgoing peer sets.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    incoming: HashMap<PublicKey, NodeInfo>,
    outgoing: HashMap<PublicKey, NodeInfo>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn admission_of(&self, key: &PublicKey) -> Option<Admission> {
        if self.incoming.contains_key(key) {
            Some(Admission::AlreadyIncoming)
        } else if self.outgoing.contains_key(key) {
            Some(Admission::AlreadyOutgoing)
        } else {
            None
        }
    }

    /// Record a peer that dialed us.
    pub fn add_incoming(&mut self, node: NodeInfo) -> Admission {
        if let Some(existing) = self.admission_of(node.public_key()) {
            return existing;
        }
        self.incoming.insert(*node.public_key(), node);
        Admission::Added
    }

    /// Record a peer we dialed.
    pub fn add_outgoing(&mut self, node: NodeInfo) -> Admission {
        if let Some(existing) = self.admission_of(node.public_key()) {
            return existing;
        }
        self.outgoing.insert(*node.public_key(), node);
        Admission::Added
    }

    /// Remove a peer from whichever set holds it.
    pub fn remove(&mut self, key: &PublicKey) -> Option<PeerDirection> {
        if self.incoming.remove(key).is_some() {
            return Some(PeerDirection::Incoming);
        }
        if self.outgoing.remove(key).is_some() {
            return Some(PeerDirection::Outgoing);
        }
        None
    }

    pub fn direction_of(&self, key: &PublicKey) -> Option<PeerDirection> {
        match self.admission_of(key)? {
            Admission::AlreadyIncoming => Some(PeerDirection::Incoming),
            _ => Some(PeerDirection::Outgoing),
        }
    }

    pub fn get(&self, key: &PublicKey) -> Option<&NodeInfo> {
        self.incoming.get(key).or_else(|| self.outgoing.get(key))
    }

    pub fn has_incoming(&self, key: &PublicKey) -> bool {
        self.incoming.contains_key(key)
    }

    pub fn has_outgoing(&self, key: &PublicKey) -> bool {
        self.outgoing.contains_key(key)
    }

    /// Keys of all outgoing peers, in no particular order.
    pub fn outgoing_keys(&self) -> Vec<PublicKey> {
        self.outgoing.keys().copied().collect()
    }

    pub fn incoming_count(&self) -> usize {
        self.incoming.len()
    }

    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn len(&self) -> usize {
        self.incoming.len() + self.outgoing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every peer.
    pub fn clear(&mut self) {
        self.incoming.clear();
        self.outgoing.clear();
    }
}
