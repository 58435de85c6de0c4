//! Peer table
//!
//! Fixed-capacity slot arena of neighbours heard on the broadcast transport.
//! Slots are stable for the life of an entry, so engines can hold a
//! [`PeerSlot`] between calls within one frame.

use serde::Serialize;
use swarmlink_core::{DeviceId, Timestamp};
use swarmlink_radio::{CommMode, RadioAddress};
use swarmlink_rf::{Rssi, SignalWindow};

use crate::envelope::{Capabilities, SourceDescriptor};
use crate::positioning::RelativePosition;

/// Index of an occupied slot in the peer table
pub type PeerSlot = usize;

/// Everything known about one neighbour
#[derive(Debug, Clone, Serialize)]
pub struct PeerRecord {
    pub device_id: DeviceId,
    pub owner: String,
    pub address: RadioAddress,
    pub device_type: String,
    pub firmware: String,
    /// Signal strength of the most recent frame
    pub last_rssi: Rssi,
    /// Recent signal samples, newest last
    #[serde(skip)]
    pub signal: SignalWindow,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub handshake_complete: bool,
    /// Shared key checked on a handshake or status envelope
    pub validated: bool,
    /// Gave up on handshaking; excluded until its next ping
    pub untrusted: bool,
    pub handshake_attempts: u8,
    pub last_handshake_sent: Option<Timestamp>,
    pub capabilities: Capabilities,
    pub preferred_mode: CommMode,
    pub position: RelativePosition,
}

impl PeerRecord {
    fn new(source: &SourceDescriptor, rssi: Rssi, signal_window: usize, now: Timestamp) -> Self {
        Self {
            device_id: source.device_id.clone(),
            owner: source.owner.clone(),
            address: source.address,
            device_type: source.device_type.clone(),
            firmware: source.firmware.clone(),
            last_rssi: rssi,
            signal: SignalWindow::new(signal_window),
            first_seen: now,
            last_seen: now,
            handshake_complete: false,
            validated: false,
            untrusted: false,
            handshake_attempts: 0,
            last_handshake_sent: None,
            capabilities: Capabilities::empty(),
            preferred_mode: CommMode::default(),
            position: RelativePosition::default(),
        }
    }

    /// Trusted peers take part in relay and positioning
    pub fn is_trusted(&self) -> bool {
        self.handshake_complete && self.validated
    }

    /// Whether this peer can take messages to the monitoring endpoint
    pub fn offers_endpoint(&self) -> bool {
        self.is_trusted() && self.capabilities.contains(Capabilities::ENDPOINT)
    }

    pub fn trust(&mut self) {
        self.handshake_complete = true;
        self.validated = true;
        self.untrusted = false;
        self.handshake_attempts = 0;
    }

    /// Whether a handshake may be sent now under the per-peer cooldown
    pub fn handshake_allowed(&self, cooldown_ms: u64, now: Timestamp) -> bool {
        match self.last_handshake_sent {
            Some(sent) => now.saturating_sub(sent) >= cooldown_ms,
            None => true,
        }
    }
}

/// Result of [`PeerTable::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(PeerSlot),
    Updated(PeerSlot),
    /// New peer and no free slot; nothing was written
    TableFull,
    /// Envelope claims this node's own device id
    OwnDevice,
}

impl UpsertOutcome {
    pub fn slot(&self) -> Option<PeerSlot> {
        match self {
            UpsertOutcome::Inserted(slot) | UpsertOutcome::Updated(slot) => Some(*slot),
            UpsertOutcome::TableFull | UpsertOutcome::OwnDevice => None,
        }
    }
}

/// Bounded table of neighbours keyed by device id
#[derive(Debug)]
pub struct PeerTable {
    own_device_id: DeviceId,
    slots: Vec<Option<PeerRecord>>,
    signal_window: usize,
}

impl PeerTable {
    pub fn new(own_device_id: impl Into<DeviceId>, capacity: usize, signal_window: usize) -> Self {
        Self {
            own_device_id: own_device_id.into(),
            slots: vec![None; capacity],
            signal_window,
        }
    }

    /// Record a frame from `source`, inserting the peer if it is new.
    ///
    /// Never evicts: a full table rejects new peers until pruning frees a
    /// slot.
    pub fn upsert(&mut self, source: &SourceDescriptor, rssi: Rssi, now: Timestamp) -> UpsertOutcome {
        if source.device_id == self.own_device_id {
            return UpsertOutcome::OwnDevice;
        }

        if let Some(slot) = self.find(&source.device_id) {
            if let Some(peer) = self.slots[slot].as_mut() {
                peer.last_seen = now;
                peer.last_rssi = rssi;
                peer.address = source.address;
                peer.owner.clone_from(&source.owner);
                peer.firmware.clone_from(&source.firmware);
            }
            return UpsertOutcome::Updated(slot);
        }

        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(PeerRecord::new(source, rssi, self.signal_window, now));
                tracing::info!(
                    device_id = %source.device_id,
                    address = %source.address,
                    rssi,
                    "New peer"
                );
                UpsertOutcome::Inserted(slot)
            }
            None => {
                tracing::warn!(device_id = %source.device_id, "Peer table full, ignoring new peer");
                UpsertOutcome::TableFull
            }
        }
    }

    pub fn find(&self, device_id: &str) -> Option<PeerSlot> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.device_id == device_id))
    }

    pub fn get(&self, slot: PeerSlot) -> Option<&PeerRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: PeerSlot) -> Option<&mut PeerRecord> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn get_by_id(&self, device_id: &str) -> Option<&PeerRecord> {
        self.find(device_id).and_then(|slot| self.get(slot))
    }

    pub fn get_by_id_mut(&mut self, device_id: &str) -> Option<&mut PeerRecord> {
        let slot = self.find(device_id)?;
        self.get_mut(slot)
    }

    /// Mark a peer as having completed the handshake
    pub fn mark_trusted(&mut self, device_id: &str) -> bool {
        match self.get_by_id_mut(device_id) {
            Some(peer) => {
                peer.trust();
                true
            }
            None => false,
        }
    }

    /// Drop peers not heard from within `stale_after_ms`; returns their ids.
    pub fn prune(&mut self, stale_after_ms: u64, now: Timestamp) -> Vec<DeviceId> {
        let mut removed = Vec::new();
        for slot in self.slots.iter_mut() {
            let stale = slot
                .as_ref()
                .is_some_and(|p| now.saturating_sub(p.last_seen) > stale_after_ms);
            if stale {
                if let Some(peer) = slot.take() {
                    tracing::info!(device_id = %peer.device_id, "Peer went stale");
                    removed.push(peer.device_id);
                }
            }
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerSlot, &PeerRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, p)| p.as_ref().map(|p| (slot, p)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PeerSlot, &mut PeerRecord)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, p)| p.as_mut().map(|p| (slot, p)))
    }

    pub fn trusted(&self) -> impl Iterator<Item = &PeerRecord> {
        self.iter().map(|(_, p)| p).filter(|p| p.is_trusted())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn trusted_count(&self) -> usize {
        self.trusted().count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}
