//! Peer event fan-out to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::domain::{PeerEvent, PeerEventKind};
use crate::ports::PeerEventStream;

struct Subscriber {
    connected: mpsc::Sender<PeerEvent>,
    disconnected: mpsc::Sender<PeerEvent>,
}

impl Subscriber {
    fn is_gone(&self) -> bool {
        self.connected.is_closed() && self.disconnected.is_closed()
    }
}

#[derive(Default)]
struct HubState {
    subscribers: Vec<Subscriber>,
    closed: bool,
}

/// Publishes peer events to bounded per-subscriber queues.
///
/// Publishing never blocks: when a subscriber's queue is full the event is
/// dropped for that subscriber and counted.
pub(crate) struct PeerEventHub {
    state: Mutex<HubState>,
    capacity: usize,
    dropped: AtomicU64,
}

impl PeerEventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// New `(connected, disconnected)` streams. Already ended after `close`.
    pub(crate) fn subscribe(&self) -> (PeerEventStream, PeerEventStream) {
        let (connected, connected_rx) = mpsc::channel(self.capacity);
        let (disconnected, disconnected_rx) = mpsc::channel(self.capacity);
        let mut state = self.state.lock();
        if !state.closed {
            state.subscribers.push(Subscriber {
                connected,
                disconnected,
            });
        }
        (
            PeerEventStream::new(connected_rx),
            PeerEventStream::new(disconnected_rx),
        )
    }

    pub(crate) fn publish(&self, event: PeerEvent) {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| !s.is_gone());
        for subscriber in &state.subscribers {
            let queue = match event.kind {
                PeerEventKind::Connected => &subscriber.connected,
                PeerEventKind::Disconnected => &subscriber.disconnected,
            };
            if let Err(TrySendError::Full(_)) = queue.try_send(event) {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    peer = %event.peer.short(),
                    kind = ?event.kind,
                    dropped,
                    "Peer event subscriber lagging, event dropped"
                );
            }
        }
    }

    /// Events dropped because a subscriber queue was full.
    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// End every stream and refuse new subscribers.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}
