//! Node identity and network-reachable node descriptions.

use shared_crypto::{NodeKeyPair, PublicKey, Signature};
use std::fmt;

/// A remote (or local) node as seen by the overlay: its key and address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    public_key: PublicKey,
    address: String,
}

impl NodeInfo {
    /// Create a node description.
    pub fn new(public_key: PublicKey, address: impl Into<String>) -> Self {
        Self {
            public_key,
            address: address.into(),
        }
    }

    /// The node's public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The node's network address.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.public_key.short(), self.address)
    }
}

/// The local node's keypair and address.
///
/// Created once at startup and owned by the swarm; immutable afterwards.
#[derive(Debug)]
pub struct NodeIdentity {
    keypair: NodeKeyPair,
    info: NodeInfo,
}

impl NodeIdentity {
    /// Bind an existing keypair to a network address.
    pub fn new(keypair: NodeKeyPair, address: impl Into<String>) -> Self {
        let info = NodeInfo::new(keypair.public_key(), address);
        Self { keypair, info }
    }

    /// Generate a fresh keypair for `address`.
    pub fn generate(address: impl Into<String>) -> Self {
        Self::new(NodeKeyPair::generate(), address)
    }

    /// Local public key.
    pub fn public_key(&self) -> PublicKey {
        *self.info.public_key()
    }

    /// Local network address.
    pub fn address(&self) -> &str {
        self.info.address()
    }

    /// Local node as a [`NodeInfo`].
    pub fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    /// Sign `bytes` with the local private key.
    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.keypair.sign(bytes)
    }
}
