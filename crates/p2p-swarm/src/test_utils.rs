//! Test utilities for the swarm.
//!
//! Scripted stand-ins for every driven port. Enable with the `test-utils`
//! feature flag.
//!
//! # Example
//!
//! ```rust
//! use p2p_swarm::test_utils::FixedTimeSource;
//! use p2p_swarm::TimeSource;
//!
//! let time = FixedTimeSource::new(1000);
//! time.advance(5);
//! assert_eq!(time.now().as_secs(), 1005);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_crypto::{NodeKeyPair, PublicKey};
use tokio::sync::{mpsc, watch};

use crate::domain::{NodeInfo, Timestamp};
use crate::ports::{
    Connection, ConnectionDirection, ConnectionId, ConnectionPool, PeerSelector, PoolEvent,
    SelectionError, Session, SessionError, TimeSource, TransportError,
};

static NEXT_MOCK_ID: AtomicU64 = AtomicU64::new(1);

/// A node with a fresh key and a unique address.
pub fn random_node() -> NodeInfo {
    let id = NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed);
    NodeInfo::new(NodeKeyPair::generate().public_key(), format!("mock:{id}"))
}

/// `count` nodes from [`random_node`].
pub fn random_nodes(count: usize) -> Vec<NodeInfo> {
    (0..count).map(|_| random_node()).collect()
}

// =============================================================================
// TIME
// =============================================================================

/// A time source that returns a settable timestamp.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    secs: AtomicI64,
}

impl FixedTimeSource {
    pub fn new(secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(secs),
        }
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.secs.load(Ordering::SeqCst))
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Session whose results can be scripted. Passes bytes through by default.
#[derive(Debug, Default)]
pub struct SessionMock {
    encrypt: Mutex<Option<Result<Vec<u8>, SessionError>>>,
    decrypt: Mutex<Option<Result<Vec<u8>, SessionError>>>,
}

impl SessionMock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later `decrypt` returns `result`.
    pub fn set_decrypt(&self, result: Result<Vec<u8>, SessionError>) {
        *self.decrypt.lock() = Some(result);
    }

    /// Every later `encrypt` returns `result`.
    pub fn set_encrypt(&self, result: Result<Vec<u8>, SessionError>) {
        *self.encrypt.lock() = Some(result);
    }
}

impl Session for SessionMock {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        match &*self.encrypt.lock() {
            Some(result) => result.clone(),
            None => Ok(plaintext.to_vec()),
        }
    }

    fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>, SessionError> {
        match &*self.decrypt.lock() {
            Some(result) => result.clone(),
            None => Ok(frame.to_vec()),
        }
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Connection that records written frames.
pub struct ConnectionMock {
    id: ConnectionId,
    remote_key: PublicKey,
    remote_address: String,
    direction: ConnectionDirection,
    session: RwLock<Option<Arc<dyn Session>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    send_error: Mutex<Option<TransportError>>,
    closed: watch::Sender<bool>,
}

impl ConnectionMock {
    /// A connection without a session.
    pub fn new(remote_key: PublicKey) -> Self {
        Self::with_address(remote_key, "mock:remote")
    }

    pub fn with_address(remote_key: PublicKey, address: impl Into<String>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed),
            remote_key,
            remote_address: address.into(),
            direction: ConnectionDirection::Outbound,
            session: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            closed,
        }
    }

    /// A connection with a pass-through [`SessionMock`].
    pub fn with_session(remote_key: PublicKey) -> Self {
        let conn = Self::new(remote_key);
        conn.set_session(Some(Arc::new(SessionMock::new())));
        conn
    }

    /// Mark the connection as accepted from the remote.
    pub fn inbound(mut self) -> Self {
        self.direction = ConnectionDirection::Inbound;
        self
    }

    pub fn set_session(&self, session: Option<Arc<dyn Session>>) {
        *self.session.write() = session;
    }

    /// Make every later `send` fail with `error`.
    pub fn set_send_error(&self, error: TransportError) {
        *self.send_error.lock() = Some(error);
    }

    /// Frames written so far.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Connection for ConnectionMock {
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
        self.session.read().clone()
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if let Some(error) = self.send_error.lock().clone() {
            return Err(error);
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }
}

// =============================================================================
// CONNECTION POOL
// =============================================================================

type DialFn =
    dyn Fn(&str, &PublicKey) -> Result<Arc<dyn Connection>, TransportError> + Send + Sync;

/// Pool with a scriptable dial function.
///
/// By default every dial succeeds with a [`ConnectionMock::with_session`].
pub struct MockConnectionPool {
    dial: RwLock<Box<DialFn>>,
    dials: AtomicUsize,
    connections: Mutex<HashMap<PublicKey, Arc<dyn Connection>>>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PoolEvent>>>,
    shut_down: AtomicBool,
}

impl Default for MockConnectionPool {
    fn default() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            dial: RwLock::new(Box::new(|_: &str, key: &PublicKey| {
                Ok(Arc::new(ConnectionMock::with_session(*key)) as Arc<dyn Connection>)
            })),
            dials: AtomicUsize::new(0),
            connections: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shut_down: AtomicBool::new(false),
        }
    }
}

impl MockConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dial function.
    pub fn set_dial<F>(&self, dial: F)
    where
        F: Fn(&str, &PublicKey) -> Result<Arc<dyn Connection>, TransportError>
            + Send
            + Sync
            + 'static,
    {
        *self.dial.write() = Box::new(dial);
    }

    /// Make every later dial fail with `error`.
    pub fn fail_dials(&self, error: TransportError) {
        self.set_dial(move |_, _| Err(error.clone()));
    }

    /// Dial attempts so far (reuses are not counted).
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Make `connection` the cached connection for its remote key.
    pub fn insert_connection(&self, connection: Arc<dyn Connection>) {
        self.connections
            .lock()
            .insert(connection.remote_public_key(), connection);
    }

    /// Announce `connection` as opened; returns the writer for its inbound
    /// frames.
    pub fn emit_opened(
        &self,
        connection: Arc<dyn Connection>,
        direction: ConnectionDirection,
        capacity: usize,
    ) -> mpsc::Sender<Vec<u8>> {
        let (frames_tx, inbound) = mpsc::channel(capacity);
        self.insert_connection(connection.clone());
        let _ = self.events_tx.send(PoolEvent::Opened {
            connection,
            direction,
            inbound,
        });
        frames_tx
    }
}

#[async_trait]
impl ConnectionPool for MockConnectionPool {
    async fn get_connection(
        &self,
        address: &str,
        remote: &PublicKey,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if let Some(existing) = self.existing_connection(remote) {
            return Ok(existing);
        }
        self.dials.fetch_add(1, Ordering::SeqCst);
        let connection = {
            let dial = self.dial.read();
            (*dial)(address, remote)?
        };
        self.insert_connection(connection.clone());
        Ok(connection)
    }

    fn existing_connection(&self, remote: &PublicKey) -> Option<Arc<dyn Connection>> {
        self.connections
            .lock()
            .get(remote)
            .filter(|c| !c.is_closed())
            .cloned()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PoolEvent>> {
        self.events_rx.lock().take()
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        for conn in self.connections.lock().values() {
            conn.close();
        }
    }
}

// =============================================================================
// PEER SELECTOR
// =============================================================================

type SelectFn = dyn Fn(usize) -> Vec<NodeInfo> + Send + Sync;

/// Peer selector with a scriptable selection function.
pub struct MockPeerSelector {
    select: RwLock<Box<SelectFn>>,
    known: RwLock<HashMap<PublicKey, NodeInfo>>,
    bootstrap_result: Mutex<Result<(), SelectionError>>,
    bootstrap_calls: AtomicUsize,
    select_calls: AtomicUsize,
    touched: Mutex<Vec<PublicKey>>,
}

impl Default for MockPeerSelector {
    fn default() -> Self {
        Self {
            select: RwLock::new(Box::new(|_| Vec::new())),
            known: RwLock::new(HashMap::new()),
            bootstrap_result: Mutex::new(Ok(())),
            bootstrap_calls: AtomicUsize::new(0),
            select_calls: AtomicUsize::new(0),
            touched: Mutex::new(Vec::new()),
        }
    }
}

impl MockPeerSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection function.
    pub fn set_select<F>(&self, select: F)
    where
        F: Fn(usize) -> Vec<NodeInfo> + Send + Sync + 'static,
    {
        *self.select.write() = Box::new(select);
    }

    pub fn set_bootstrap_result(&self, result: Result<(), SelectionError>) {
        *self.bootstrap_result.lock() = result;
    }

    pub fn bootstrap_calls(&self) -> usize {
        self.bootstrap_calls.load(Ordering::SeqCst)
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    /// Keys passed to `touch`, in order.
    pub fn touched(&self) -> Vec<PublicKey> {
        self.touched.lock().clone()
    }
}

#[async_trait]
impl PeerSelector for MockPeerSelector {
    async fn select_peers(&self, count: usize) -> Vec<NodeInfo> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        let select = self.select.read();
        (*select)(count)
    }

    async fn lookup(&self, key: &PublicKey) -> Option<NodeInfo> {
        self.known.read().get(key).cloned()
    }

    async fn bootstrap(&self) -> Result<(), SelectionError> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        self.bootstrap_result.lock().clone()
    }

    fn update(&self, node: NodeInfo) {
        self.known.write().insert(*node.public_key(), node);
    }

    fn touch(&self, key: &PublicKey) {
        self.touched.lock().push(*key);
    }
}
