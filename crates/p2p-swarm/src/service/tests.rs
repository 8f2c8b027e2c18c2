//! Unit tests for the swarm service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_crypto::{NodeKeyPair, PublicKey};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::Swarm;
use crate::domain::{
    FormatStage, NodeIdentity, NodeInfo, PeerEvent, ProtocolMessage, SwarmConfig, SwarmError,
    Timestamp,
};
use crate::ports::{
    Connection, ConnectionDirection, ConnectionPool, PeerSelector, PoolEvent, SelectionError,
    SessionError,
    TransportError,
};
use crate::test_utils::{
    random_node, random_nodes, ConnectionMock, FixedTimeSource, MockConnectionPool,
    MockPeerSelector, SessionMock,
};

const NOW: i64 = 1_700_000_000;
const EXAMPLE_PROTOCOL: &str = "EX";
const EXAMPLE_PAYLOAD: &[u8] = b"Example";

// =============================================================================
// HELPERS
// =============================================================================

struct Harness {
    swarm: Swarm,
    pool: Arc<MockConnectionPool>,
    selector: Arc<MockPeerSelector>,
}

fn harness(config: SwarmConfig) -> Harness {
    harness_with_pool(config, Arc::new(MockConnectionPool::new()))
}

fn harness_with_pool(config: SwarmConfig, pool: Arc<MockConnectionPool>) -> Harness {
    let selector = Arc::new(MockPeerSelector::new());
    let swarm = Swarm::with_time_source(
        config,
        NodeIdentity::generate("mock:local"),
        pool.clone(),
        selector.clone(),
        Arc::new(FixedTimeSource::new(NOW)),
    )
    .unwrap();
    Harness {
        swarm,
        pool,
        selector,
    }
}

fn gossip_config(target: usize) -> SwarmConfig {
    SwarmConfig {
        gossip: true,
        target_outgoing_peers: target,
        ..SwarmConfig::for_testing()
    }
}

fn signed_frame(keys: &NodeKeyPair, protocol: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut message =
        ProtocolMessage::new(keys.public_key(), protocol, Timestamp::new(timestamp), payload.to_vec());
    message.sign(keys).unwrap();
    message.encode().unwrap()
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for: {what}");
}

fn take_replenish_requests(swarm: &Swarm) -> mpsc::Receiver<()> {
    swarm.inner.more_peers_rx.lock().take().unwrap()
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn test_shutdown_without_start() {
    let h = harness(SwarmConfig::for_testing());
    h.swarm.shutdown();
    h.swarm.shutdown();

    assert!(h.swarm.is_shut_down());
    assert!(!h.swarm.is_running());
    assert!(h.pool.was_shut_down());
}

#[test]
fn test_invalid_config_rejected() {
    let config = SwarmConfig {
        peer_event_capacity: 0,
        ..SwarmConfig::for_testing()
    };
    let result = Swarm::new(
        config,
        NodeIdentity::generate("mock:local"),
        Arc::new(MockConnectionPool::new()),
        Arc::new(MockPeerSelector::new()),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_start_twice_fails() {
    let h = harness(SwarmConfig::for_testing());
    assert_eq!(h.swarm.start(), Ok(()));
    assert!(h.swarm.is_running());
    assert_eq!(h.swarm.start(), Err(SwarmError::AlreadyRunning));
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_start_after_shutdown_fails() {
    let h = harness(SwarmConfig::for_testing());
    h.swarm.shutdown();
    assert_eq!(h.swarm.start(), Err(SwarmError::ShuttingDown));
}

#[tokio::test]
async fn test_gossip_disabled_completes_initial_peering_immediately() {
    let h = harness(SwarmConfig::for_testing());
    h.swarm.start().unwrap();

    let waited = timeout(Duration::from_millis(200), h.swarm.wait_initial_peers()).await;
    assert_eq!(waited.unwrap(), Ok(()));
    assert_eq!(h.selector.select_calls(), 0);
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let h = harness(gossip_config(3));
    let mut endpoint = h.swarm.register_protocol(EXAMPLE_PROTOCOL);
    let (mut connected, mut disconnected) = h.swarm.subscribe_peer_events();
    h.swarm.start().unwrap();

    let waiter = {
        let swarm = h.swarm.clone();
        tokio::spawn(async move { swarm.wait_initial_peers().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.swarm.shutdown();

    let waited = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(waited, Err(SwarmError::ShuttingDown));
    assert!(timeout(Duration::from_secs(1), endpoint.recv()).await.unwrap().is_none());
    assert!(connected.recv().await.is_none());
    assert!(disconnected.recv().await.is_none());
    assert!(h.pool.was_shut_down());

    let peer = NodeKeyPair::generate().public_key();
    assert_eq!(
        h.swarm.send_message(&peer, EXAMPLE_PROTOCOL, vec![1]).await,
        Err(SwarmError::ShuttingDown)
    );
}

#[test]
fn test_register_after_shutdown_is_closed() {
    let h = harness(SwarmConfig::for_testing());
    h.swarm.shutdown();
    let mut endpoint = h.swarm.register_protocol(EXAMPLE_PROTOCOL);
    assert!(endpoint.try_recv().is_none());
}

// =============================================================================
// RECEIVE PIPELINE
// =============================================================================

#[tokio::test]
async fn test_on_remote_message_rejection_order() {
    let h = harness(SwarmConfig::for_testing());
    let inner = &h.swarm.inner;
    let sender = NodeKeyPair::generate();
    let conn = ConnectionMock::new(sender.public_key());

    // no frame at all
    assert_eq!(
        inner.on_remote_message(&conn, &[]).await,
        Err(SwarmError::BadFormat(FormatStage::PreSession))
    );

    // no session on the connection
    assert_eq!(
        inner.on_remote_message(&conn, b"test").await,
        Err(SwarmError::NoSession)
    );

    // session cannot decrypt
    let session = Arc::new(SessionMock::new());
    conn.set_session(Some(session.clone()));
    session.set_decrypt(Err(SessionError::Decrypt("fail".into())));
    assert_eq!(
        inner.on_remote_message(&conn, b"test").await,
        Err(SwarmError::FailDecrypt)
    );

    // decrypts to something that is not a message
    session.set_decrypt(Ok(b"wont_format_fo_protocol_message".to_vec()));
    assert_eq!(
        inner.on_remote_message(&conn, b"test").await,
        Err(SwarmError::BadFormat(FormatStage::PostSession))
    );

    // an hour old
    let stale = signed_frame(&sender, EXAMPLE_PROTOCOL, NOW - 3600, EXAMPLE_PAYLOAD);
    session.set_decrypt(Ok(stale));
    assert_eq!(
        inner.on_remote_message(&conn, b"test").await,
        Err(SwarmError::OutOfSync { drift_secs: -3600 })
    );

    // current but unsigned
    let unsigned = ProtocolMessage::new(
        sender.public_key(),
        EXAMPLE_PROTOCOL,
        Timestamp::new(NOW),
        EXAMPLE_PAYLOAD.to_vec(),
    )
    .encode()
    .unwrap();
    session.set_decrypt(Ok(unsigned));
    assert_eq!(
        inner.on_remote_message(&conn, b"test").await,
        Err(SwarmError::AuthFailure)
    );

    // valid but nobody listens
    let valid = signed_frame(&sender, EXAMPLE_PROTOCOL, NOW, EXAMPLE_PAYLOAD);
    session.set_decrypt(Ok(valid));
    assert_eq!(
        inner.on_remote_message(&conn, b"test").await,
        Err(SwarmError::NoProtocol(EXAMPLE_PROTOCOL.to_string()))
    );

    // delivered
    let mut endpoint = h.swarm.register_protocol(EXAMPLE_PROTOCOL);
    assert_eq!(inner.on_remote_message(&conn, b"test").await, Ok(()));
    let delivered = endpoint.recv().await.unwrap();
    assert_eq!(delivered.sender(), &sender.public_key());
    assert_eq!(delivered.protocol(), EXAMPLE_PROTOCOL);
    assert_eq!(delivered.bytes(), EXAMPLE_PAYLOAD);
}

#[tokio::test]
async fn test_skew_window_boundaries() {
    let h = harness(SwarmConfig::for_testing());
    let inner = &h.swarm.inner;
    let sender = NodeKeyPair::generate();
    let conn = ConnectionMock::with_session(sender.public_key());
    let mut endpoint = h.swarm.register_protocol(EXAMPLE_PROTOCOL);
    let tolerance = SwarmConfig::for_testing().clock_skew_tolerance();

    for offset in [-tolerance, tolerance] {
        let frame = signed_frame(&sender, EXAMPLE_PROTOCOL, NOW + offset, EXAMPLE_PAYLOAD);
        assert_eq!(inner.on_remote_message(&conn, &frame).await, Ok(()));
        assert!(endpoint.recv().await.is_some());
    }

    let ahead = signed_frame(&sender, EXAMPLE_PROTOCOL, NOW + tolerance + 1, EXAMPLE_PAYLOAD);
    assert_eq!(
        inner.on_remote_message(&conn, &ahead).await,
        Err(SwarmError::OutOfSync {
            drift_secs: tolerance + 1
        })
    );
}

#[tokio::test]
async fn test_authenticated_sender_is_touched() {
    let h = harness(SwarmConfig::for_testing());
    let sender = NodeKeyPair::generate();
    let conn = ConnectionMock::with_session(sender.public_key());

    let unsigned = ProtocolMessage::new(
        sender.public_key(),
        EXAMPLE_PROTOCOL,
        Timestamp::new(NOW),
        Vec::new(),
    )
    .encode()
    .unwrap();
    let _ = h.swarm.inner.on_remote_message(&conn, &unsigned).await;
    assert!(h.selector.touched().is_empty());

    let frame = signed_frame(&sender, EXAMPLE_PROTOCOL, NOW, EXAMPLE_PAYLOAD);
    let result = h.swarm.inner.on_remote_message(&conn, &frame).await;
    assert_eq!(result, Err(SwarmError::NoProtocol(EXAMPLE_PROTOCOL.into())));
    assert_eq!(h.selector.touched(), vec![sender.public_key()]);
}

#[tokio::test]
async fn test_fatal_frame_closes_connection() {
    let h = harness(SwarmConfig::for_testing());
    let (_connected, mut disconnected) = h.swarm.subscribe_peer_events();
    h.swarm.start().unwrap();

    let remote = NodeKeyPair::generate().public_key();
    let conn = Arc::new(ConnectionMock::with_session(remote));
    let frames = h.pool.emit_opened(conn.clone(), ConnectionDirection::Inbound, 8);
    eventually("incoming peer registered", || h.swarm.has_incoming_peer(&remote)).await;

    frames.send(Vec::new()).await.unwrap();
    timeout(Duration::from_secs(2), conn.closed()).await.unwrap();
    eventually("peer removed", || !h.swarm.has_incoming_peer(&remote)).await;

    let event = timeout(Duration::from_secs(1), disconnected.recv()).await.unwrap();
    assert_eq!(event, Some(PeerEvent::disconnected(remote)));
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_recoverable_error_keeps_connection() {
    let h = harness(SwarmConfig::for_testing());
    let mut endpoint = h.swarm.register_protocol(EXAMPLE_PROTOCOL);
    h.swarm.start().unwrap();

    let sender = NodeKeyPair::generate();
    let conn = Arc::new(ConnectionMock::with_session(sender.public_key()));
    let frames = h.pool.emit_opened(conn.clone(), ConnectionDirection::Inbound, 8);

    frames.send(b"garbage".to_vec()).await.unwrap();
    frames
        .send(signed_frame(&sender, "UNKNOWN", NOW, b"x"))
        .await
        .unwrap();
    frames
        .send(signed_frame(&sender, EXAMPLE_PROTOCOL, NOW, EXAMPLE_PAYLOAD))
        .await
        .unwrap();

    let delivered = timeout(Duration::from_secs(2), endpoint.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.bytes(), EXAMPLE_PAYLOAD);
    assert!(!conn.is_closed());
    assert!(h.swarm.has_incoming_peer(&sender.public_key()));
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_frames_queued_before_close_are_delivered() {
    const FRAMES: usize = 5;
    let h = harness(SwarmConfig::for_testing());
    let mut endpoint = h.swarm.register_protocol(EXAMPLE_PROTOCOL);
    let (_connected, mut disconnected) = h.swarm.subscribe_peer_events();

    let sender = NodeKeyPair::generate();
    let conn = Arc::new(ConnectionMock::with_session(sender.public_key()));
    let frames = h.pool.emit_opened(conn.clone(), ConnectionDirection::Inbound, 16);
    for i in 0..FRAMES {
        frames
            .send(signed_frame(&sender, EXAMPLE_PROTOCOL, NOW, &[i as u8]))
            .await
            .unwrap();
    }
    // remote closes before the reader has seen a single frame
    conn.close();
    h.swarm.start().unwrap();

    for i in 0..FRAMES {
        let msg = timeout(Duration::from_secs(2), endpoint.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.bytes(), &[i as u8]);
    }
    let event = timeout(Duration::from_secs(1), disconnected.recv()).await.unwrap();
    assert_eq!(event, Some(PeerEvent::disconnected(sender.public_key())));
    h.swarm.shutdown();
}

// =============================================================================
// INBOUND CONNECTIONS
// =============================================================================

#[tokio::test]
async fn test_inbound_connection_registers_incoming_peer() {
    let h = harness(SwarmConfig::for_testing());
    let (mut connected, mut disconnected) = h.swarm.subscribe_peer_events();
    h.swarm.start().unwrap();

    let remote = NodeKeyPair::generate().public_key();
    let conn = Arc::new(ConnectionMock::with_session(remote));
    let _frames = h.pool.emit_opened(conn.clone(), ConnectionDirection::Inbound, 8);

    let event = timeout(Duration::from_secs(1), connected.recv()).await.unwrap();
    assert_eq!(event, Some(PeerEvent::connected(remote)));
    assert!(h.swarm.has_incoming_peer(&remote));
    assert_eq!(h.swarm.incoming_count(), 1);

    conn.close();
    let event = timeout(Duration::from_secs(1), disconnected.recv()).await.unwrap();
    assert_eq!(event, Some(PeerEvent::disconnected(remote)));
    assert!(!h.swarm.has_incoming_peer(&remote));
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_outbound_pool_event_adds_no_peer() {
    let h = harness(SwarmConfig::for_testing());
    h.swarm.start().unwrap();

    let remote = NodeKeyPair::generate().public_key();
    let conn = Arc::new(ConnectionMock::with_session(remote));
    let _frames = h.pool.emit_opened(conn, ConnectionDirection::Outbound, 8);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.swarm.incoming_count(), 0);
    assert_eq!(h.swarm.outgoing_count(), 0);
    h.swarm.shutdown();
}

#[test]
fn test_lagging_subscriber_drops_newest_events() {
    let config = SwarmConfig {
        peer_event_capacity: 1,
        ..SwarmConfig::for_testing()
    };
    let h = harness(config);
    let (mut connected, mut disconnected) = h.swarm.subscribe_peer_events();
    let first = random_node();
    let second = random_node();

    assert!(h.swarm.add_incoming_peer(first.clone()));
    assert!(h.swarm.add_incoming_peer(second.clone()));
    assert_eq!(h.swarm.dropped_peer_events(), 1);
    assert!(h.swarm.has_incoming_peer(second.public_key()));

    assert_eq!(connected.try_recv(), Some(PeerEvent::connected(*first.public_key())));
    assert!(connected.try_recv().is_none());

    // separate queue: disconnects still fit
    h.swarm.disconnect(first.public_key());
    assert_eq!(
        disconnected.try_recv(),
        Some(PeerEvent::disconnected(*first.public_key()))
    );
    assert_eq!(h.swarm.dropped_peer_events(), 1);
}

#[tokio::test]
async fn test_inbound_from_outgoing_peer_stays_outgoing() {
    let h = harness(SwarmConfig::for_testing());
    let (mut connected, _disconnected) = h.swarm.subscribe_peer_events();
    let node = random_node();
    assert!(h.swarm.inner.add_outgoing_peer(node.clone()));
    assert_eq!(connected.try_recv(), Some(PeerEvent::connected(*node.public_key())));

    assert!(!h.swarm.add_incoming_peer(node.clone()));
    assert!(h.swarm.has_outgoing_peer(node.public_key()));
    assert!(!h.swarm.has_incoming_peer(node.public_key()));
    assert!(connected.try_recv().is_none());
}

// =============================================================================
// NEIGHBORHOOD
// =============================================================================

#[tokio::test]
async fn test_get_more_peers() {
    let h = harness(SwarmConfig::for_testing());
    let (mut connected, _disconnected) = h.swarm.subscribe_peer_events();
    let inner = &h.swarm.inner;

    // nothing to select
    assert_eq!(inner.get_more_peers(1).await, 0);
    assert_eq!(inner.outgoing_count(), 0);

    // candidate cannot be dialed
    let candidate = random_node();
    {
        let candidate = candidate.clone();
        h.selector.set_select(move |_| vec![candidate.clone()]);
    }
    h.pool
        .fail_dials(TransportError::Unreachable(candidate.address().into()));
    assert_eq!(inner.get_more_peers(1).await, 0);
    assert_eq!(inner.outgoing_count(), 0);
    assert!(connected.try_recv().is_none());

    // candidate reachable
    h.pool.set_dial(|_, key| {
        Ok(Arc::new(ConnectionMock::with_session(*key)) as Arc<dyn Connection>)
    });
    assert_eq!(inner.get_more_peers(1).await, 1);
    assert!(h.swarm.has_outgoing_peer(candidate.public_key()));
    assert_eq!(
        connected.try_recv(),
        Some(PeerEvent::connected(*candidate.public_key()))
    );

    // many candidates
    const NUM_PEERS: usize = 10;
    h.selector.set_select(random_nodes);
    assert_eq!(inner.get_more_peers(NUM_PEERS).await, NUM_PEERS);
    assert_eq!(inner.outgoing_count(), NUM_PEERS + 1);
}

#[tokio::test]
async fn test_get_more_peers_skips_incoming_candidates() {
    let h = harness(SwarmConfig::for_testing());
    const NUM_PEERS: usize = 3;

    let incoming = random_node();
    assert!(h.swarm.add_incoming_peer(incoming.clone()));
    {
        let incoming = incoming.clone();
        h.selector.set_select(move |count| {
            let mut nodes = vec![incoming.clone()];
            nodes.extend(random_nodes(count - 1));
            nodes
        });
    }

    assert_eq!(h.swarm.inner.get_more_peers(NUM_PEERS).await, NUM_PEERS - 1);
    assert!(!h.swarm.has_outgoing_peer(incoming.public_key()));
    assert!(h.swarm.has_incoming_peer(incoming.public_key()));
}

#[tokio::test]
async fn test_get_more_peers_ignores_reused_inbound_link() {
    let h = harness(SwarmConfig::for_testing());
    let (mut connected, _disconnected) = h.swarm.subscribe_peer_events();

    // the remote dialed us, but the swarm has not seen the pool event yet
    let remote = random_node();
    let conn = Arc::new(ConnectionMock::with_session(*remote.public_key()).inbound());
    let _frames = h.pool.emit_opened(conn, ConnectionDirection::Inbound, 8);
    {
        let remote = remote.clone();
        h.selector.set_select(move |_| vec![remote.clone()]);
    }

    assert_eq!(h.swarm.inner.get_more_peers(1).await, 0);
    assert_eq!(h.pool.dial_count(), 0);
    assert!(!h.swarm.has_outgoing_peer(remote.public_key()));
    assert!(connected.try_recv().is_none());

    h.swarm.start().unwrap();
    eventually("inbound link filed as incoming", || {
        h.swarm.has_incoming_peer(remote.public_key())
    })
    .await;
    assert_eq!(h.swarm.outgoing_count(), 0);
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_get_more_peers_does_not_recount_outgoing() {
    let h = harness(SwarmConfig::for_testing());
    let node = random_node();
    {
        let node = node.clone();
        h.selector.set_select(move |_| vec![node.clone()]);
    }

    assert_eq!(h.swarm.inner.get_more_peers(1).await, 1);
    assert_eq!(h.swarm.inner.get_more_peers(1).await, 0);
    assert_eq!(h.swarm.outgoing_count(), 1);
}

/// Pool whose dials never complete.
struct StallingPool;

#[async_trait]
impl ConnectionPool for StallingPool {
    async fn get_connection(
        &self,
        _address: &str,
        _remote: &PublicKey,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        std::future::pending().await
    }

    fn existing_connection(&self, _remote: &PublicKey) -> Option<Arc<dyn Connection>> {
        None
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PoolEvent>> {
        None
    }

    fn shutdown(&self) {}
}

#[tokio::test(start_paused = true)]
async fn test_get_more_peers_bounded_by_connect_timeout() {
    let selector = Arc::new(MockPeerSelector::new());
    selector.set_select(random_nodes);
    let swarm = Swarm::with_time_source(
        SwarmConfig::for_testing(),
        NodeIdentity::generate("mock:local"),
        Arc::new(StallingPool),
        selector,
        Arc::new(FixedTimeSource::new(NOW)),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(swarm.inner.get_more_peers(3).await, 0);
    assert!(started.elapsed() >= SwarmConfig::for_testing().connect_timeout());
}

#[tokio::test]
async fn test_ask_for_more_peers_marks_initial_peering() {
    let h = harness(gossip_config(3));
    h.selector.set_select(random_nodes);

    assert!(h.swarm.inner.ask_for_more_peers().await);
    assert_eq!(h.swarm.outgoing_count(), 3);
    let waited = timeout(Duration::from_millis(100), h.swarm.wait_initial_peers()).await;
    assert_eq!(waited.unwrap(), Ok(()));

    // already satisfied: no new selection
    let calls = h.selector.select_calls();
    assert!(h.swarm.inner.ask_for_more_peers().await);
    assert_eq!(h.selector.select_calls(), calls);
}

#[tokio::test]
async fn test_ask_for_more_peers_below_target() {
    let h = harness(gossip_config(3));
    assert!(!h.swarm.inner.ask_for_more_peers().await);

    let waited = timeout(Duration::from_millis(50), h.swarm.wait_initial_peers()).await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn test_neighborhood_reaches_target() {
    let h = harness(gossip_config(3));
    h.selector.set_select(random_nodes);
    h.swarm.start().unwrap();

    let waited = timeout(Duration::from_secs(2), h.swarm.wait_initial_peers()).await;
    assert_eq!(waited.unwrap(), Ok(()));
    assert_eq!(h.swarm.outgoing_count(), 3);
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_neighborhood_retries_until_candidates_appear() {
    let h = harness(gossip_config(2));
    h.swarm.start().unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(h.selector.select_calls() >= 2, "rounds retried");
    assert_eq!(h.swarm.outgoing_count(), 0);

    h.selector.set_select(random_nodes);
    let waited = timeout(Duration::from_secs(2), h.swarm.wait_initial_peers()).await;
    assert_eq!(waited.unwrap(), Ok(()));
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_neighborhood_replaces_lost_peer() {
    let h = harness(gossip_config(3));
    h.selector.set_select(random_nodes);
    let (_connected, mut disconnected) = h.swarm.subscribe_peer_events();
    h.swarm.start().unwrap();
    timeout(Duration::from_secs(2), h.swarm.wait_initial_peers())
        .await
        .unwrap()
        .unwrap();

    let victim = outgoing_key(&h.swarm);
    h.swarm.disconnect(&victim);
    assert_eq!(
        timeout(Duration::from_secs(1), disconnected.recv()).await.unwrap(),
        Some(PeerEvent::disconnected(victim))
    );

    eventually("neighborhood refilled", || h.swarm.outgoing_count() == 3).await;
    assert!(!h.swarm.has_outgoing_peer(&victim));
    h.swarm.shutdown();
}

fn outgoing_key(swarm: &Swarm) -> PublicKey {
    swarm.inner.directory.read().outgoing_keys()[0]
}

#[tokio::test]
async fn test_bootstrap_runs_before_neighborhood() {
    let config = SwarmConfig {
        bootstrap: true,
        ..gossip_config(2)
    };
    let h = harness(config);
    h.selector.set_select(random_nodes);
    h.swarm.start().unwrap();

    let waited = timeout(Duration::from_secs(2), h.swarm.wait_initial_peers()).await;
    assert_eq!(waited.unwrap(), Ok(()));
    assert_eq!(h.selector.bootstrap_calls(), 1);
    h.swarm.shutdown();
}

#[tokio::test]
async fn test_bootstrap_failure_shuts_down() {
    let config = SwarmConfig {
        bootstrap: true,
        ..gossip_config(2)
    };
    let h = harness(config);
    h.selector
        .set_bootstrap_result(Err(SelectionError::Bootstrap("no seeds".into())));
    h.swarm.start().unwrap();

    let waited = timeout(Duration::from_secs(2), h.swarm.wait_initial_peers()).await;
    assert_eq!(waited.unwrap(), Err(SwarmError::ShuttingDown));
    assert!(h.swarm.is_shut_down());
    assert_eq!(h.selector.select_calls(), 0);
}

// =============================================================================
// DISCONNECT
// =============================================================================

#[tokio::test]
async fn test_disconnect_outgoing_requests_replacement() {
    let h = harness(SwarmConfig::for_testing());
    let mut requests = take_replenish_requests(&h.swarm);
    let (_connected, mut disconnected) = h.swarm.subscribe_peer_events();

    let node = random_node();
    {
        let node = node.clone();
        h.selector.set_select(move |_| vec![node.clone()]);
    }
    assert_eq!(h.swarm.inner.get_more_peers(1).await, 1);
    let conn = h.pool.existing_connection(node.public_key()).unwrap();

    h.swarm.disconnect(node.public_key());

    assert!(!h.swarm.has_outgoing_peer(node.public_key()));
    assert_eq!(
        disconnected.try_recv(),
        Some(PeerEvent::disconnected(*node.public_key()))
    );
    assert!(requests.try_recv().is_ok());
    assert!(requests.try_recv().is_err());
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_disconnect_incoming_requests_nothing() {
    let h = harness(SwarmConfig::for_testing());
    let mut requests = take_replenish_requests(&h.swarm);
    let (_connected, mut disconnected) = h.swarm.subscribe_peer_events();

    let node = random_node();
    assert!(h.swarm.add_incoming_peer(node.clone()));
    h.swarm.disconnect(node.public_key());

    assert!(!h.swarm.has_incoming_peer(node.public_key()));
    assert_eq!(
        disconnected.try_recv(),
        Some(PeerEvent::disconnected(*node.public_key()))
    );
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_unknown_peer_is_noop() {
    let h = harness(SwarmConfig::for_testing());
    let mut requests = take_replenish_requests(&h.swarm);
    let (_connected, mut disconnected) = h.swarm.subscribe_peer_events();

    h.swarm.disconnect(&NodeKeyPair::generate().public_key());
    assert!(disconnected.try_recv().is_none());
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn test_replenishment_requests_coalesce() {
    let h = harness(SwarmConfig::for_testing());
    let mut requests = take_replenish_requests(&h.swarm);
    h.selector.set_select(random_nodes);
    assert_eq!(h.swarm.inner.get_more_peers(3).await, 3);

    for _ in 0..3 {
        let key = outgoing_key(&h.swarm);
        h.swarm.disconnect(&key);
    }
    assert_eq!(h.swarm.outgoing_count(), 0);
    assert!(requests.try_recv().is_ok());
    assert!(requests.try_recv().is_err());
}

// =============================================================================
// SEND PATH
// =============================================================================

#[tokio::test]
async fn test_send_to_unresolvable_peer() {
    let h = harness(SwarmConfig::for_testing());
    let stranger = NodeKeyPair::generate().public_key();

    let result = h.swarm.send_message(&stranger, EXAMPLE_PROTOCOL, vec![1]).await;
    assert_eq!(result, Err(SwarmError::NoRoute(stranger)));
    assert_eq!(h.pool.dial_count(), 0);
}

#[tokio::test]
async fn test_send_resolves_through_selector() {
    let h = harness(SwarmConfig::for_testing());
    let target = random_node();
    h.selector.update(target.clone());

    let conn = Arc::new(ConnectionMock::with_session(*target.public_key()));
    let dialed = Arc::new(Mutex::new(Vec::new()));
    {
        let conn = conn.clone();
        let dialed = dialed.clone();
        h.pool.set_dial(move |address, _| {
            dialed.lock().push(address.to_string());
            Ok(conn.clone() as Arc<dyn Connection>)
        });
    }

    h.swarm
        .send_message(target.public_key(), EXAMPLE_PROTOCOL, EXAMPLE_PAYLOAD.to_vec())
        .await
        .unwrap();

    assert_eq!(*dialed.lock(), vec![target.address().to_string()]);
    let frames = conn.sent_frames();
    assert_eq!(frames.len(), 1);

    // pass-through session: the frame is the encoded message
    let message = ProtocolMessage::decode(&frames[0]).unwrap();
    assert_eq!(message.verify_author(), Ok(*h.swarm.local_node().public_key()));
    assert_eq!(message.protocol, EXAMPLE_PROTOCOL);
    assert_eq!(message.payload, EXAMPLE_PAYLOAD);
    assert_eq!(message.timestamp, NOW);

    // second send reuses the connection
    h.swarm
        .send_message(target.public_key(), EXAMPLE_PROTOCOL, vec![2])
        .await
        .unwrap();
    assert_eq!(h.pool.dial_count(), 1);
    assert_eq!(conn.sent_frames().len(), 2);
}

#[tokio::test]
async fn test_send_to_known_peer_uses_directory_address() {
    let h = harness(SwarmConfig::for_testing());
    let peer = NodeInfo::new(NodeKeyPair::generate().public_key(), "mock:known");
    h.swarm.add_incoming_peer(peer.clone());

    let dialed = Arc::new(Mutex::new(Vec::new()));
    {
        let dialed = dialed.clone();
        h.pool.set_dial(move |address, key| {
            dialed.lock().push(address.to_string());
            Ok(Arc::new(ConnectionMock::with_session(*key)) as Arc<dyn Connection>)
        });
    }

    h.swarm
        .send_message(peer.public_key(), EXAMPLE_PROTOCOL, vec![1])
        .await
        .unwrap();
    assert_eq!(*dialed.lock(), vec!["mock:known".to_string()]);
}

#[tokio::test]
async fn test_send_failures() {
    let h = harness(SwarmConfig::for_testing());
    let target = random_node();
    h.selector.update(target.clone());
    let key = *target.public_key();

    h.pool.fail_dials(TransportError::Unreachable(target.address().into()));
    let result = h.swarm.send_message(&key, EXAMPLE_PROTOCOL, vec![1]).await;
    assert!(matches!(result, Err(SwarmError::DialFailed(_))));

    let no_session = Arc::new(ConnectionMock::new(key));
    {
        let conn = no_session.clone();
        h.pool.set_dial(move |_, _| Ok(conn.clone() as Arc<dyn Connection>));
    }
    let result = h.swarm.send_message(&key, EXAMPLE_PROTOCOL, vec![1]).await;
    assert_eq!(result, Err(SwarmError::NoSession));

    let session = Arc::new(SessionMock::new());
    session.set_encrypt(Err(SessionError::Encrypt("boom".into())));
    no_session.set_session(Some(session.clone()));
    let result = h.swarm.send_message(&key, EXAMPLE_PROTOCOL, vec![1]).await;
    assert!(matches!(result, Err(SwarmError::Encrypt(_))));

    no_session.set_session(Some(Arc::new(SessionMock::new())));
    no_session.set_send_error(TransportError::Closed);
    let result = h.swarm.send_message(&key, EXAMPLE_PROTOCOL, vec![1]).await;
    assert!(matches!(result, Err(SwarmError::Transport(_))));
}
