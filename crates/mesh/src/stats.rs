//! Node counters
//!
//! [`NodeCounters`] is owned by the node and updated inline. [`SharedCounters`]
//! is the message tally shared between the receive worker and the status
//! task; every access waits at most a bounded time for the lock and skips
//! the update on timeout.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::envelope::MessageKind;
use crate::error::{MeshError, MeshResult};

/// Per-node event counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeCounters {
    pub frames_received: u64,
    pub decode_errors: u64,
    pub auth_failures: u64,
    pub own_frames: u64,
    pub peers_rejected: u64,
    pub handshakes_sent: u64,
    pub messages_stored: u64,
    pub messages_evicted: u64,
    pub messages_expired: u64,
    pub messages_delivered: u64,
    pub relays_sent: u64,
    pub relays_received: u64,
    pub relay_loops_dropped: u64,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub uplink_failures: u64,
}

/// Message counts by kind plus deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MessageTally {
    pub pings: u64,
    pub data: u64,
    pub handshakes: u64,
    pub positioning: u64,
    pub relays: u64,
    pub distances: u64,
    pub dropped: u64,
    pub delivered: u64,
}

impl MessageTally {
    pub fn record(&mut self, kind: MessageKind) {
        match kind {
            MessageKind::Ping => self.pings += 1,
            MessageKind::Data => self.data += 1,
            MessageKind::Handshake => self.handshakes += 1,
            MessageKind::Positioning => self.positioning += 1,
            MessageKind::Relay => self.relays += 1,
            MessageKind::Distance => self.distances += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pings + self.data + self.handshakes + self.positioning + self.relays + self.distances
    }
}

/// Tally shared across tasks behind a time-bounded lock
#[derive(Debug, Clone, Default)]
pub struct SharedCounters {
    inner: Arc<Mutex<MessageTally>>,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` if the lock is acquired within `wait`.
    pub async fn update_within<F>(&self, wait: Duration, update: F) -> MeshResult<()>
    where
        F: FnOnce(&mut MessageTally),
    {
        match tokio::time::timeout(wait, self.inner.lock()).await {
            Ok(mut tally) => {
                update(&mut tally);
                Ok(())
            }
            Err(_) => Err(MeshError::Timeout(format!("counter lock not acquired within {:?}", wait))),
        }
    }

    /// Copy of the tally if the lock is acquired within `wait`.
    pub async fn snapshot_within(&self, wait: Duration) -> MeshResult<MessageTally> {
        tokio::time::timeout(wait, self.inner.lock())
            .await
            .map(|tally| *tally)
            .map_err(|_| MeshError::Timeout(format!("counter lock not acquired within {:?}", wait)))
    }
}
