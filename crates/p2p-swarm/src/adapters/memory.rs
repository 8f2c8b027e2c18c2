//! # In-Memory Transport
//!
//! A [`ConnectionPool`] whose links are pairs of bounded channels inside one
//! process. Used to run several swarms against each other in tests and local
//! simulations.
//!
//! ## Link Model
//!
//! - A [`MemoryNetwork`] maps listen addresses to bound pools.
//! - Dialing resolves the address, checks the listener holds the expected
//!   key, and creates both ends of the link with a fresh [`SessionKey`].
//! - Both ends share one closed flag: closing either end closes the link.
//! - Frames travel through bounded queues, so a slow reader back-pressures
//!   the writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_crypto::{open, seal, PublicKey, SessionKey};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::domain::NodeInfo;
use crate::ports::{
    Connection, ConnectionDirection, ConnectionId, ConnectionPool, PoolEvent, Session,
    SessionError, TransportError,
};

/// Default per-direction frame queue of a link.
pub const DEFAULT_FRAME_CAPACITY: usize = 64;

// =============================================================================
// SESSION
// =============================================================================

/// XChaCha20-Poly1305 session over a shared key.
pub struct CipherSession {
    key: SessionKey,
}

impl CipherSession {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }
}

impl Session for CipherSession {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        seal(&self.key, plaintext).map_err(|e| SessionError::Encrypt(e.to_string()))
    }

    fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>, SessionError> {
        open(&self.key, frame).map_err(|e| SessionError::Decrypt(e.to_string()))
    }
}

// =============================================================================
// NETWORK
// =============================================================================

struct Listener {
    public_key: PublicKey,
    pool: Weak<PoolInner>,
}

#[derive(Default)]
struct NetworkInner {
    listeners: RwLock<HashMap<String, Listener>>,
    next_connection_id: AtomicU64,
}

/// Process-local address space shared by memory pools.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a pool for `local` at its address.
    pub fn bind(&self, local: &NodeInfo) -> Result<MemoryConnectionPool, TransportError> {
        self.bind_with_capacity(local, DEFAULT_FRAME_CAPACITY)
    }

    /// Bind with an explicit per-link frame queue capacity.
    pub fn bind_with_capacity(
        &self,
        local: &NodeInfo,
        frame_capacity: usize,
    ) -> Result<MemoryConnectionPool, TransportError> {
        let mut listeners = self.inner.listeners.write();
        if listeners
            .get(local.address())
            .is_some_and(|l| l.pool.strong_count() > 0)
        {
            return Err(TransportError::AddressInUse(local.address().to_string()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(PoolInner {
            local: local.clone(),
            network: self.clone(),
            frame_capacity: frame_capacity.max(1),
            connections: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            closed: AtomicBool::new(false),
        });
        listeners.insert(
            local.address().to_string(),
            Listener {
                public_key: *local.public_key(),
                pool: Arc::downgrade(&pool),
            },
        );
        debug!(address = %local.address(), "Memory pool bound");
        Ok(MemoryConnectionPool { inner: pool })
    }

    /// Whether a live pool listens on `address`.
    pub fn is_bound(&self, address: &str) -> bool {
        self.resolve(address).is_some()
    }

    fn resolve(&self, address: &str) -> Option<(PublicKey, Arc<PoolInner>)> {
        let listeners = self.inner.listeners.read();
        let listener = listeners.get(address)?;
        let pool = listener.pool.upgrade()?;
        if pool.closed.load(Ordering::Acquire) {
            return None;
        }
        Some((listener.public_key, pool))
    }

    fn unbind(&self, address: &str, pool: &PoolInner) {
        let mut listeners = self.inner.listeners.write();
        let owned = listeners
            .get(address)
            .is_some_and(|l| std::ptr::eq(l.pool.as_ptr(), pool));
        if owned {
            listeners.remove(address);
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// One end of an in-memory link.
pub struct MemoryConnection {
    id: ConnectionId,
    remote_key: PublicKey,
    remote_address: String,
    direction: ConnectionDirection,
    session: Arc<CipherSession>,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    link: Arc<watch::Sender<bool>>,
}

impl MemoryConnection {
    fn new(
        id: ConnectionId,
        remote: &NodeInfo,
        direction: ConnectionDirection,
        key: SessionKey,
        outbound: mpsc::Sender<Vec<u8>>,
        link: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            id,
            remote_key: *remote.public_key(),
            remote_address: remote.address().to_string(),
            direction,
            session: Arc::new(CipherSession::new(key)),
            outbound: Mutex::new(Some(outbound)),
            link,
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_public_key(&self) -> PublicKey {
        self.remote_key
    }

    fn remote_address(&self) -> &str {
        &self.remote_address
    }

    fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    fn session(&self) -> Option<Arc<dyn Session>> {
        Some(self.session.clone())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let sender = self.outbound.lock().clone().ok_or(TransportError::Closed)?;
        tokio::select! {
            sent = sender.send(frame) => sent.map_err(|_| TransportError::Closed),
            _ = self.closed() => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.outbound.lock().take();
        self.link.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.link.borrow()
    }

    async fn closed(&self) {
        let mut link = self.link.subscribe();
        let _ = link.wait_for(|closed| *closed).await;
    }
}

// =============================================================================
// CONNECTION POOL
// =============================================================================

struct PoolInner {
    local: NodeInfo,
    network: MemoryNetwork,
    frame_capacity: usize,
    connections: Mutex<HashMap<PublicKey, Arc<MemoryConnection>>>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PoolEvent>>>,
    closed: AtomicBool,
}

impl PoolInner {
    fn live(&self, key: &PublicKey) -> Option<Arc<MemoryConnection>> {
        let mut connections = self.connections.lock();
        match connections.get(key) {
            Some(conn) if !conn.is_closed() => Some(conn.clone()),
            Some(_) => {
                connections.remove(key);
                None
            }
            None => None,
        }
    }

    /// Register the listening end of a new link.
    fn accept(&self, connection: Arc<MemoryConnection>, inbound: mpsc::Receiver<Vec<u8>>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.connections
            .lock()
            .insert(connection.remote_key, connection.clone());
        self.emit(connection, ConnectionDirection::Inbound, inbound);
        true
    }

    fn emit(
        &self,
        connection: Arc<MemoryConnection>,
        direction: ConnectionDirection,
        inbound: mpsc::Receiver<Vec<u8>>,
    ) {
        let event = PoolEvent::Opened {
            connection,
            direction,
            inbound,
        };
        if self.events_tx.send(event).is_err() {
            debug!(address = %self.local.address(), "Pool event dropped, no listener");
        }
    }
}

/// [`ConnectionPool`] over a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryConnectionPool {
    inner: Arc<PoolInner>,
}

impl MemoryConnectionPool {
    /// Node this pool is bound for.
    pub fn local(&self) -> &NodeInfo {
        &self.inner.local
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .lock()
            .values()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl ConnectionPool for MemoryConnectionPool {
    async fn get_connection(
        &self,
        address: &str,
        remote: &PublicKey,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let pool = &self.inner;
        if pool.closed.load(Ordering::Acquire) {
            return Err(TransportError::PoolShutdown);
        }
        if let Some(existing) = pool.live(remote) {
            return Ok(existing);
        }

        let (listener_key, remote_pool) = pool
            .network
            .resolve(address)
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;
        if listener_key != *remote {
            return Err(TransportError::IdentityMismatch {
                address: address.to_string(),
            });
        }
        if Arc::ptr_eq(&remote_pool, pool) {
            return Err(TransportError::Unreachable(address.to_string()));
        }

        let key = SessionKey::generate();
        let (link, _) = watch::channel(false);
        let link = Arc::new(link);
        let (to_remote, remote_inbound) = mpsc::channel(pool.frame_capacity);
        let (to_local, local_inbound) = mpsc::channel(pool.frame_capacity);

        let dialer_end = Arc::new(MemoryConnection::new(
            pool.network.next_connection_id(),
            &NodeInfo::new(*remote, address),
            ConnectionDirection::Outbound,
            key.clone(),
            to_remote,
            link.clone(),
        ));
        {
            let mut connections = pool.connections.lock();
            if let Some(existing) = connections.get(remote).filter(|c| !c.is_closed()) {
                return Ok(existing.clone());
            }
            connections.insert(*remote, dialer_end.clone());
        }

        let listener_end = Arc::new(MemoryConnection::new(
            pool.network.next_connection_id(),
            &pool.local,
            ConnectionDirection::Inbound,
            key,
            to_local,
            link,
        ));
        if !remote_pool.accept(listener_end, remote_inbound) {
            pool.connections.lock().remove(remote);
            dialer_end.close();
            return Err(TransportError::Unreachable(address.to_string()));
        }

        debug!(
            local = %pool.local,
            remote = %remote.short(),
            id = dialer_end.id,
            "Memory link established"
        );
        pool.emit(
            dialer_end.clone(),
            ConnectionDirection::Outbound,
            local_inbound,
        );
        Ok(dialer_end)
    }

    fn existing_connection(&self, remote: &PublicKey) -> Option<Arc<dyn Connection>> {
        self.inner
            .live(remote)
            .map(|conn| conn as Arc<dyn Connection>)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PoolEvent>> {
        self.inner.events_rx.lock().take()
    }

    fn shutdown(&self) {
        let pool = &self.inner;
        if pool.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        pool.network.unbind(pool.local.address(), pool);
        let drained: Vec<_> = pool.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.close();
        }
        debug!(
            address = %pool.local.address(),
            closed = drained.len(),
            "Memory pool shut down"
        );
    }
}
