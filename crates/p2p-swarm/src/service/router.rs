//! # Protocol Router
//!
//! Maps protocol names to bounded delivery queues.
//!
//! Lookups take a read lock and clone the sender out, so a slow consumer
//! only blocks its own deliveries, never registration or other protocols.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::InboundMessage;
use crate::ports::ProtocolEndpoint;

pub(crate) struct ProtocolRouter {
    handlers: RwLock<HashMap<String, mpsc::Sender<InboundMessage>>>,
    capacity: usize,
}

impl ProtocolRouter {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register `name`. A previous endpoint for the same name is closed.
    pub(crate) fn register(&self, name: &str) -> ProtocolEndpoint {
        let (tx, rx) = mpsc::channel(self.capacity);
        let replaced = self.handlers.write().insert(name.to_string(), tx);
        if replaced.is_some() {
            debug!(protocol = name, "Protocol re-registered, previous endpoint closed");
        } else {
            debug!(protocol = name, "Protocol registered");
        }
        ProtocolEndpoint::new(name, rx)
    }

    /// Delivery queue for `name`, if registered.
    pub(crate) fn route(&self, name: &str) -> Option<mpsc::Sender<InboundMessage>> {
        self.handlers.read().get(name).cloned()
    }

    pub(crate) fn is_registered(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Drop every queue so all endpoints observe end-of-stream.
    pub(crate) fn close_all(&self) {
        self.handlers.write().clear();
    }
}
