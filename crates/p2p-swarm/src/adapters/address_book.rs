//! # Address Book
//!
//! A [`PeerSelector`] backed by a flat table of known nodes. Stands in for a
//! DHT in local networks and tests: selection is a uniform random sample,
//! lookups are exact-key.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use shared_crypto::PublicKey;
use tracing::debug;

use crate::domain::NodeInfo;
use crate::ports::{PeerSelector, SelectionError};

#[derive(Debug, Clone)]
struct Entry {
    node: NodeInfo,
    last_seen: Option<Instant>,
}

/// In-memory table of known nodes.
#[derive(Debug)]
pub struct AddressBook {
    local: PublicKey,
    bootstrap_nodes: Vec<NodeInfo>,
    entries: RwLock<HashMap<PublicKey, Entry>>,
}

impl AddressBook {
    /// Empty book that never returns `local`.
    pub fn new(local: PublicKey) -> Self {
        Self {
            local,
            bootstrap_nodes: Vec::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Nodes loaded by [`PeerSelector::bootstrap`].
    #[must_use]
    pub fn with_bootstrap_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.bootstrap_nodes = nodes;
        self
    }

    /// Forget a node.
    pub fn remove(&self, key: &PublicKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the node was last marked active, if ever.
    pub fn last_seen(&self, key: &PublicKey) -> Option<Instant> {
        self.entries.read().get(key).and_then(|e| e.last_seen)
    }

    fn insert(&self, node: NodeInfo) {
        if node.public_key() == &self.local {
            return;
        }
        let mut entries = self.entries.write();
        match entries.get_mut(node.public_key()) {
            Some(entry) => entry.node = node,
            None => {
                entries.insert(
                    *node.public_key(),
                    Entry {
                        node,
                        last_seen: None,
                    },
                );
            }
        }
    }
}

#[async_trait]
impl PeerSelector for AddressBook {
    async fn select_peers(&self, count: usize) -> Vec<NodeInfo> {
        let known: Vec<NodeInfo> = self
            .entries
            .read()
            .values()
            .map(|e| e.node.clone())
            .collect();
        let mut rng = rand::thread_rng();
        known.choose_multiple(&mut rng, count).cloned().collect()
    }

    async fn lookup(&self, key: &PublicKey) -> Option<NodeInfo> {
        self.entries.read().get(key).map(|e| e.node.clone())
    }

    async fn bootstrap(&self) -> Result<(), SelectionError> {
        if self.bootstrap_nodes.is_empty() && self.is_empty() {
            return Err(SelectionError::NoBootstrapNodes);
        }
        for node in &self.bootstrap_nodes {
            self.insert(node.clone());
        }
        debug!(known = self.len(), "Address book bootstrapped");
        Ok(())
    }

    fn update(&self, node: NodeInfo) {
        self.insert(node);
    }

    fn touch(&self, key: &PublicKey) {
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.last_seen = Some(Instant::now());
        }
    }
}
