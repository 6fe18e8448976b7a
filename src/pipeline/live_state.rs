//! Live location broadcast
//!
//! Replay-latest, multi-subscriber channel of [`LiveLocationState`]. New
//! subscribers first see the current value (if any), then every later update
//! in publish order. A subscriber that falls more than the channel capacity
//! behind is disconnected rather than slowing the publisher down.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::defaults::BROADCAST_CAPACITY;
use crate::types::{LiveLocationState, PositionFix};

struct Shared {
    latest: Mutex<Option<LiveLocationState>>,
    tx: broadcast::Sender<LiveLocationState>,
}

/// Cheaply cloneable handle; all clones share the same channel.
#[derive(Clone)]
pub struct LiveStateBroadcast {
    shared: Arc<Shared>,
}

impl Default for LiveStateBroadcast {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl LiveStateBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                latest: Mutex::new(None),
                tx,
            }),
        }
    }

    /// Overwrite the current value and fan it out. Never blocks on subscribers.
    pub fn publish(&self, position: Option<PositionFix>, heading_deg: f64) {
        let state = LiveLocationState {
            position,
            heading_deg,
        };
        // Sending under the lock keeps `subscribe` from missing or repeating an update.
        let mut latest = self.shared.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = Some(state);
        // Err only means nobody is listening.
        let _ = self.shared.tx.send(state);
    }

    /// Subscribe, replaying the current value first.
    pub fn subscribe(&self) -> LiveStateSubscription {
        let latest = self.shared.latest.lock().unwrap_or_else(|e| e.into_inner());
        let rx = self.shared.tx.subscribe();
        LiveStateSubscription {
            replay: *latest,
            rx,
            disconnected: false,
        }
    }

    /// Current value without subscribing.
    pub fn latest(&self) -> Option<LiveLocationState> {
        *self.shared.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the current position but keep the last heading.
    ///
    /// Subscribers receive the cleared state so map markers can be removed.
    pub fn clear(&self) {
        let mut latest = self.shared.latest.lock().unwrap_or_else(|e| e.into_inner());
        let cleared = match *latest {
            Some(state) if state.position.is_some() => LiveLocationState {
                position: None,
                heading_deg: state.heading_deg,
            },
            _ => return,
        };
        debug!("[LiveState] Clearing live position");
        *latest = Some(cleared);
        let _ = self.shared.tx.send(cleared);
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.tx.receiver_count()
    }
}

/// A single observer's view of the broadcast.
pub struct LiveStateSubscription {
    replay: Option<LiveLocationState>,
    rx: broadcast::Receiver<LiveLocationState>,
    disconnected: bool,
}

impl LiveStateSubscription {
    /// Next state, or `None` once the broadcast is gone or this subscriber lagged.
    pub async fn recv(&mut self) -> Option<LiveLocationState> {
        if let Some(state) = self.replay.take() {
            return Some(state);
        }
        if self.disconnected {
            return None;
        }
        match self.rx.recv().await {
            Ok(state) => Some(state),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "[LiveState] Subscriber lagged behind, disconnecting");
                self.disconnected = true;
                None
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.disconnected = true;
                None
            }
        }
    }

    /// Whether the subscription was cut off for lagging or closure.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}
