//! Swarm construction, lifecycle and peer bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shared_crypto::PublicKey;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::events::PeerEventHub;
use super::router::ProtocolRouter;
use crate::adapters::SystemTimeSource;
use crate::domain::{
    Admission, ConfigError, NodeIdentity, NodeInfo, PeerDirection, PeerDirectory, PeerEvent,
    SwarmConfig, SwarmError,
};
use crate::ports::{
    Connection, ConnectionDirection, ConnectionPool, PeerSelector, PoolEvent, TimeSource,
};

/// Overlay node: owns the peer directory, protocol router and neighborhood
/// manager, and drives every connection the pool opens.
///
/// Cloning yields another handle to the same swarm.
#[derive(Clone)]
pub struct Swarm {
    pub(crate) inner: Arc<SwarmInner>,
}

pub(crate) struct SwarmInner {
    pub(crate) config: SwarmConfig,
    pub(crate) identity: NodeIdentity,
    pub(crate) pool: Arc<dyn ConnectionPool>,
    pub(crate) selector: Arc<dyn PeerSelector>,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) directory: RwLock<PeerDirectory>,
    pub(crate) router: ProtocolRouter,
    pub(crate) peer_events: PeerEventHub,
    more_peers_tx: mpsc::Sender<()>,
    pub(crate) more_peers_rx: Mutex<Option<mpsc::Receiver<()>>>,
    initial_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Swarm {
    /// Create a swarm using the system clock.
    pub fn new(
        config: SwarmConfig,
        identity: NodeIdentity,
        pool: Arc<dyn ConnectionPool>,
        selector: Arc<dyn PeerSelector>,
    ) -> Result<Self, ConfigError> {
        Self::with_time_source(config, identity, pool, selector, Arc::new(SystemTimeSource))
    }

    /// Create a swarm with an explicit clock.
    pub fn with_time_source(
        config: SwarmConfig,
        identity: NodeIdentity,
        pool: Arc<dyn ConnectionPool>,
        selector: Arc<dyn PeerSelector>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        // Capacity 1: pending replenishment requests coalesce into one.
        let (more_peers_tx, more_peers_rx) = mpsc::channel(1);
        let (initial_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = SwarmInner {
            router: ProtocolRouter::new(config.protocol_queue_capacity),
            peer_events: PeerEventHub::new(config.peer_event_capacity),
            config,
            identity,
            pool,
            selector,
            clock,
            directory: RwLock::new(PeerDirectory::new()),
            more_peers_tx,
            more_peers_rx: Mutex::new(Some(more_peers_rx)),
            initial_tx,
            shutdown_tx,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Start the pool event loop, bootstrap and the neighborhood manager.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), SwarmError> {
        let inner = &self.inner;
        if inner.is_shut_down() {
            return Err(SwarmError::ShuttingDown);
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            return Err(SwarmError::AlreadyRunning);
        }

        info!(
            node = %inner.identity.node_info(),
            gossip = inner.config.gossip,
            bootstrap = inner.config.bootstrap,
            target = inner.config.target_outgoing_peers,
            "Starting swarm"
        );

        match inner.pool.take_events() {
            Some(events) => {
                tokio::spawn(Arc::clone(inner).run_pool_events(events));
            }
            None => warn!("Connection pool events already taken, inbound links will be ignored"),
        }

        if inner.config.bootstrap || inner.config.gossip {
            tokio::spawn(Arc::clone(inner).run_overlay());
        }
        if !inner.config.gossip {
            inner.mark_initial_peering_complete();
        }
        Ok(())
    }

    /// Stop every task, close all endpoints and event streams, and shut the
    /// connection pool down. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Wait until the neighborhood first reaches its target size.
    ///
    /// Returns `ShuttingDown` if the swarm stops first.
    pub async fn wait_initial_peers(&self) -> Result<(), SwarmError> {
        let mut initial = self.inner.initial_tx.subscribe();
        let mut shutdown = self.inner.shutdown_signal();
        tokio::select! {
            biased;
            _ = initial.wait_for(|done| *done) => Ok(()),
            _ = shutdown.wait_for(|stopped| *stopped) => Err(SwarmError::ShuttingDown),
        }
    }

    /// The local node.
    pub fn local_node(&self) -> &NodeInfo {
        self.inner.identity.node_info()
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.inner.config
    }

    pub fn outgoing_count(&self) -> usize {
        self.inner.outgoing_count()
    }

    pub fn incoming_count(&self) -> usize {
        self.inner.directory.read().incoming_count()
    }

    pub fn has_incoming_peer(&self, peer: &PublicKey) -> bool {
        self.inner.directory.read().has_incoming(peer)
    }

    pub fn has_outgoing_peer(&self, peer: &PublicKey) -> bool {
        self.inner.directory.read().has_outgoing(peer)
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.is_shut_down()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Peer events dropped because a subscriber was not keeping up.
    pub fn dropped_peer_events(&self) -> u64 {
        self.inner.peer_events.dropped_count()
    }

    /// Record a peer that dialed us. Returns `false` if already known.
    pub fn add_incoming_peer(&self, node: NodeInfo) -> bool {
        self.inner.add_incoming_peer(node)
    }
}

impl SwarmInner {
    pub(crate) fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(node = %self.identity.node_info(), "Shutting down swarm");
        self.shutdown_tx.send_replace(true);
        self.pool.shutdown();
        self.router.close_all();
        self.peer_events.close();
        self.directory.write().clear();
    }

    pub(crate) fn outgoing_count(&self) -> usize {
        self.directory.read().outgoing_count()
    }

    pub(crate) fn mark_initial_peering_complete(&self) {
        let first = self.initial_tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
        if first {
            info!(outgoing = self.outgoing_count(), "Initial peering complete");
        }
    }

    /// Ask the neighborhood manager for another peering round.
    ///
    /// Never blocks; requests arriving while one is pending are merged.
    pub(crate) fn request_more_peers(&self) {
        if self.more_peers_tx.try_send(()).is_err() {
            debug!("Peering request already pending");
        }
    }

    // =========================================================================
    // PEER DIRECTORY
    // =========================================================================

    pub(crate) fn add_incoming_peer(&self, node: NodeInfo) -> bool {
        let mut directory = self.directory.write();
        match directory.add_incoming(node.clone()) {
            Admission::Added => {
                debug!(peer = %node, "Incoming peer added");
                self.peer_events.publish(PeerEvent::connected(*node.public_key()));
                true
            }
            Admission::AlreadyOutgoing => {
                debug!(peer = %node, "Inbound link from outgoing peer, keeping outgoing");
                false
            }
            Admission::AlreadyIncoming => false,
        }
    }

    /// Record a dialed candidate. Returns `true` if it became a new
    /// outgoing peer.
    pub(crate) fn add_outgoing_peer(&self, node: NodeInfo) -> bool {
        let mut directory = self.directory.write();
        match directory.add_outgoing(node.clone()) {
            Admission::Added => {
                debug!(peer = %node, "Outgoing peer added");
                self.peer_events.publish(PeerEvent::connected(*node.public_key()));
                true
            }
            Admission::AlreadyIncoming => {
                debug!(peer = %node, "Candidate already connected as incoming");
                false
            }
            Admission::AlreadyOutgoing => false,
        }
    }

    /// Remove a peer, publish the disconnect and, for outgoing peers, ask for
    /// a replacement.
    pub(crate) fn remove_peer(&self, peer: &PublicKey) -> Option<PeerDirection> {
        let removed = {
            let mut directory = self.directory.write();
            let removed = directory.remove(peer);
            if removed.is_some() {
                self.peer_events.publish(PeerEvent::disconnected(*peer));
            }
            removed
        };
        match removed {
            Some(PeerDirection::Outgoing) => {
                debug!(peer = %peer.short(), "Outgoing peer removed");
                self.request_more_peers();
            }
            Some(PeerDirection::Incoming) => {
                debug!(peer = %peer.short(), "Incoming peer removed");
            }
            None => {}
        }
        removed
    }

    pub(crate) fn disconnect(&self, peer: &PublicKey) {
        self.remove_peer(peer);
        if let Some(connection) = self.pool.existing_connection(peer) {
            connection.close();
        }
    }

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================

    /// Bootstrap peer selection, then run the neighborhood manager.
    async fn run_overlay(self: Arc<Self>) {
        if self.config.bootstrap {
            info!("Bootstrapping peer selection");
            let mut shutdown = self.shutdown_signal();
            let result = tokio::select! {
                result = self.selector.bootstrap() => result,
                _ = shutdown.wait_for(|stopped| *stopped) => return,
            };
            if let Err(e) = result {
                error!(error = %e, "Bootstrap failed, shutting down");
                self.shutdown();
                return;
            }
            info!("Bootstrap complete");
        }
        if self.config.gossip {
            let requests = self.more_peers_rx.lock().take();
            match requests {
                Some(requests) => self.run_neighborhood(requests).await,
                None => error!("Neighborhood manager already running"),
            }
        }
    }

    async fn run_pool_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PoolEvent>) {
        let mut shutdown = self.shutdown_signal();
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                PoolEvent::Opened {
                    connection,
                    direction,
                    inbound,
                } => {
                    if direction == ConnectionDirection::Inbound {
                        self.add_incoming_peer(NodeInfo::new(
                            connection.remote_public_key(),
                            connection.remote_address(),
                        ));
                    }
                    tokio::spawn(Arc::clone(&self).run_connection(connection, inbound));
                }
            }
        }
        debug!("Pool event loop stopped");
    }

    /// Feed every inbound frame of one connection through the pipeline.
    async fn run_connection(
        self: Arc<Self>,
        connection: Arc<dyn Connection>,
        mut inbound: mpsc::Receiver<Vec<u8>>,
    ) {
        let mut shutdown = self.shutdown_signal();
        loop {
            // Queued frames win over the close signal: whatever the remote
            // wrote before closing is still delivered.
            let frame = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => return,
                frame = inbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = connection.closed() => match inbound.try_recv() {
                    Ok(frame) => frame,
                    Err(_) => break,
                },
            };
            match self.on_remote_message(connection.as_ref(), &frame).await {
                Ok(()) => {}
                Err(e) if e.is_connection_fatal() => {
                    warn!(
                        peer = %connection.remote_public_key().short(),
                        error = %e,
                        "Closing connection after fatal message error"
                    );
                    break;
                }
                Err(SwarmError::ShuttingDown) => return,
                Err(e) => {
                    warn!(
                        peer = %connection.remote_public_key().short(),
                        error = %e,
                        "Dropped inbound message"
                    );
                }
            }
        }
        self.on_connection_closed(connection.as_ref());
    }

    fn on_connection_closed(&self, connection: &dyn Connection) {
        connection.close();
        let peer = connection.remote_public_key();
        if let Some(current) = self.pool.existing_connection(&peer) {
            if current.id() != connection.id() {
                debug!(peer = %peer.short(), "Newer connection still live, keeping peer");
                return;
            }
        }
        self.remove_peer(&peer);
    }
}
