//! Mesh node
//!
//! Owns every engine plus the radio and wires them together. Two entry
//! points drive it: [`MeshNode::handle_frame`] for each frame taken off the
//! receive queue and [`MeshNode::tick`] for periodic work. Both read the
//! time from the injected [`Clock`]. All state lives behind `&mut self`, so
//! a host that runs the two entry points on different tasks wraps the node
//! in one lock.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use swarmlink_core::{Clock, DeviceId, NodeConfig, Timestamp};
use swarmlink_radio::{CommMode, Destination, ModeSelector, RadioAddress, RadioController, RadioDriver, ReceivedFrame};
use swarmlink_rf::{PathLossModel, Rssi};

use crate::discovery::{DiscoveryEngine, LocalAdvert};
use crate::envelope::{
    Capabilities, DistanceEntry, DistancePayload, Envelope, EnvelopeCodec, MessageKind, Outbound, Payload,
    RelayPayload, SourceDescriptor, StatusReport,
};
use crate::error::{MeshError, MeshResult};
use crate::peer::{PeerSlot, PeerTable, UpsertOutcome};
use crate::positioning::PositioningEngine;
use crate::relay::{RelayLimits, RelayStore, StoreOutcome};
use crate::scheduler::{Scheduler, Task};
use crate::stats::NodeCounters;
use crate::uplink::{RelayDirection, Uplink, UplinkRecord};

/// Transmit power advertised in positioning pings (dBm)
const POSITIONING_TX_POWER_DBM: i8 = 20;
/// Rough encoded size of a distance envelope without entries
const DISTANCE_ENVELOPE_OVERHEAD: usize = 200;
/// Rough encoded size of one distance entry
const DISTANCE_ENTRY_BYTES: usize = 64;

/// Why a received frame was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Decode,
    OwnFrame,
    Auth,
    RelayLoop,
}

/// What happened to a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Routed(MessageKind),
    Dropped(DropReason),
}

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub device_id: DeviceId,
    pub owner: String,
    pub address: RadioAddress,
    pub mode: CommMode,
    pub uptime_s: u64,
    pub peers: usize,
    pub trusted_peers: usize,
    pub stored: usize,
    pub undelivered: usize,
    pub endpoint_available: bool,
    pub counters: NodeCounters,
}

type MemoryProbe = Box<dyn Fn() -> u32 + Send>;

/// One mesh node on top of a radio driver
pub struct MeshNode<D: RadioDriver> {
    config: NodeConfig,
    clock: Arc<dyn Clock>,
    codec: EnvelopeCodec,
    peers: PeerTable,
    discovery: DiscoveryEngine,
    positioning: PositioningEngine,
    relay: RelayStore,
    modes: ModeSelector,
    radio: RadioController<D>,
    scheduler: Scheduler,
    serial: Option<Box<dyn Uplink>>,
    endpoint: Option<Box<dyn Uplink>>,
    memory_probe: Option<MemoryProbe>,
    counters: NodeCounters,
    booted_at: Timestamp,
    report_seq: u32,
}

impl<D: RadioDriver> MeshNode<D> {
    /// Build a node from a validated configuration.
    pub fn new(config: NodeConfig, driver: D, clock: Arc<dyn Clock>) -> MeshResult<Self> {
        config.validate()?;

        let identity = &config.identity;
        let source = SourceDescriptor {
            device_id: identity.device_id.clone(),
            owner: identity.owner.clone(),
            address: driver.address(),
            device_type: identity.device_type.clone(),
            firmware: identity.firmware.clone(),
        };
        let codec = EnvelopeCodec::new(source, config.security.shared_key.clone(), config.radio.max_frame_bytes);

        let timing = &config.timing;
        let capacity = &config.capacity;
        let peers = PeerTable::new(identity.device_id.clone(), capacity.max_peers, capacity.signal_window);
        let discovery = DiscoveryEngine::new(timing.handshake_cooldown_ms, capacity.max_handshake_attempts);
        let positioning = PositioningEngine::new(
            PathLossModel::from(&config.calibration),
            capacity.min_peers_for_direction,
            timing.peer_stale_ms,
        );
        let relay = RelayStore::new(
            identity.device_id.clone(),
            identity.owner.clone(),
            RelayLimits {
                capacity: capacity.max_stored_messages,
                ttl_ms: timing.message_ttl_ms,
                max_hops: capacity.max_hops,
                retry_cooldown_ms: timing.relay_retry_cooldown_ms,
                max_attempted_peers: capacity.max_attempted_peers,
                max_relay_attempts: capacity.max_relay_attempts,
            },
        );
        let modes = ModeSelector::new(config.infra.preference, timing.mode_dwell_ms);
        let radio = RadioController::new(
            driver,
            config.radio.channel,
            config.infra.networks.clone(),
            Duration::from_millis(config.radio.settle_ms),
        );
        let scheduler = Scheduler::new(timing);
        let booted_at = clock.now_ms();

        Ok(Self {
            config,
            clock,
            codec,
            peers,
            discovery,
            positioning,
            relay,
            modes,
            radio,
            scheduler,
            serial: None,
            endpoint: None,
            memory_probe: None,
            counters: NodeCounters::default(),
            booted_at,
            report_seq: 0,
        })
    }

    /// Mirror node activity to a serial console
    pub fn with_serial_uplink(mut self, uplink: impl Uplink + 'static) -> Self {
        self.serial = Some(Box::new(uplink));
        self
    }

    /// Sink for messages delivered to the monitoring endpoint
    pub fn with_endpoint_uplink(mut self, uplink: impl Uplink + 'static) -> Self {
        self.endpoint = Some(Box::new(uplink));
        self
    }

    /// Source of the free-memory figure in status reports
    pub fn with_memory_probe(mut self, probe: impl Fn() -> u32 + Send + 'static) -> Self {
        self.memory_probe = Some(Box::new(probe));
        self
    }

    /// Pin the first outbound message id
    pub fn with_first_msg_id(mut self, msg_id: u32) -> Self {
        self.codec = self.codec.with_first_msg_id(msg_id);
        self
    }

    /// Bring the broadcast transport up.
    pub fn start(&mut self) -> MeshResult<()> {
        self.radio.ensure_broadcast_active()?;
        tracing::info!(
            device_id = %self.codec.device_id(),
            address = %self.radio.address(),
            channel = self.config.radio.channel,
            "Mesh node started"
        );
        Ok(())
    }

    pub fn device_id(&self) -> &str {
        self.codec.device_id()
    }

    pub fn address(&self) -> RadioAddress {
        self.radio.address()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn mode(&self) -> CommMode {
        self.modes.current()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn relay_store(&self) -> &RelayStore {
        &self.relay
    }

    pub fn counters(&self) -> &NodeCounters {
        &self.counters
    }

    pub fn radio(&self) -> &RadioController<D> {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut RadioController<D> {
        &mut self.radio
    }

    /// Whether stored messages can go straight to the endpoint
    pub fn endpoint_available(&self) -> bool {
        self.endpoint.is_some() && self.modes.current().has_infra() && self.radio.link_status().endpoint_reachable
    }

    fn mesh_enabled(&self) -> bool {
        self.modes.current().uses_broadcast()
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::RELAY | Capabilities::POSITIONING;
        if self.modes.current().has_infra() && self.radio.link_status().infra_connected {
            caps.insert(Capabilities::INFRA);
        }
        if self.endpoint_available() {
            caps.insert(Capabilities::ENDPOINT);
        }
        caps
    }

    fn local_advert(&self) -> LocalAdvert {
        LocalAdvert {
            caps: self.capabilities(),
            mode: self.modes.current(),
        }
    }

    fn uptime_s(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.booted_at) / 1_000
    }

    fn status_report(&self, now: Timestamp) -> StatusReport {
        StatusReport {
            seq: 0,
            free_heap: self.memory_probe.as_ref().map(|probe| probe()).unwrap_or(0),
            uptime_s: self.uptime_s(now),
            mode: self.modes.current(),
            peer_count: self.peers.len().min(u8::MAX as usize) as u8,
            caps: self.capabilities(),
        }
    }

    /// Snapshot of the node for status reporting
    pub fn status(&self) -> NodeStatus {
        let now = self.clock.now_ms();
        NodeStatus {
            device_id: self.codec.device_id().to_string(),
            owner: self.codec.source().owner.clone(),
            address: self.radio.address(),
            mode: self.modes.current(),
            uptime_s: self.uptime_s(now),
            peers: self.peers.len(),
            trusted_peers: self.peers.trusted_count(),
            stored: self.relay.len(),
            undelivered: self.relay.undelivered_count(),
            endpoint_available: self.endpoint_available(),
            counters: self.counters,
        }
    }

    /// Decode, authenticate and route one received frame.
    ///
    /// Any reply is sent only after the frame was validated and the peer
    /// table updated.
    pub fn handle_frame(&mut self, frame: &ReceivedFrame) -> Disposition {
        let now = self.clock.now_ms();
        self.counters.frames_received += 1;

        let envelope = match self.codec.decode(&frame.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters.decode_errors += 1;
                tracing::debug!(from = %frame.from, error = %e, "Dropping undecodable frame");
                return Disposition::Dropped(DropReason::Decode);
            }
        };
        if self.codec.is_own(&envelope) {
            self.counters.own_frames += 1;
            return Disposition::Dropped(DropReason::OwnFrame);
        }
        if let Err(e) = self.authenticate(&envelope) {
            self.counters.auth_failures += 1;
            tracing::debug!(from = %frame.from, error = %e, "Dropping unauthenticated frame");
            return Disposition::Dropped(DropReason::Auth);
        }

        let kind = envelope.kind();
        let slot = match self.register_peer(&envelope, frame.rssi, now) {
            Ok(slot) => Some(slot),
            Err(e) => {
                tracing::debug!(error = %e, "Frame processed without a peer entry");
                None
            }
        };

        match kind {
            MessageKind::Ping | MessageKind::Handshake => self.discover(&envelope, slot, now),
            MessageKind::Data => {
                self.discover(&envelope, slot, now);
                self.accept_status(envelope, now);
            }
            MessageKind::Positioning => {}
            MessageKind::Distance => {
                if let Payload::Distance(report) = envelope.payload {
                    self.publish_serial(UplinkRecord::Distances {
                        device_id: envelope.source.device_id,
                        entries: report.entries,
                    });
                }
            }
            MessageKind::Relay => {
                if let Payload::Relay(relay) = envelope.payload {
                    return self.accept_relay(&envelope.source.device_id, relay, now);
                }
            }
        }
        Disposition::Routed(kind)
    }

    fn authenticate(&self, envelope: &Envelope) -> MeshResult<()> {
        if self.codec.validate(envelope) {
            Ok(())
        } else {
            Err(MeshError::Auth {
                device_id: envelope.source.device_id.clone(),
            })
        }
    }

    fn register_peer(&mut self, envelope: &Envelope, rssi: Rssi, now: Timestamp) -> MeshResult<PeerSlot> {
        match self.peers.upsert(&envelope.source, rssi, now) {
            UpsertOutcome::Inserted(slot) | UpsertOutcome::Updated(slot) => {
                self.positioning
                    .update_peer_position(&mut self.peers, &envelope.source.device_id, rssi, now);
                Ok(slot)
            }
            UpsertOutcome::TableFull => {
                self.counters.peers_rejected += 1;
                Err(MeshError::Capacity(format!(
                    "peer table full, {} not added",
                    envelope.source.device_id
                )))
            }
            UpsertOutcome::OwnDevice => Err(MeshError::Auth {
                device_id: envelope.source.device_id.clone(),
            }),
        }
    }

    fn discover(&mut self, envelope: &Envelope, slot: Option<PeerSlot>, now: Timestamp) {
        let Some(slot) = slot else {
            return;
        };
        let local = self.local_advert();
        if let Some(reply) = self.discovery.on_envelope(envelope, slot, &mut self.peers, local, now) {
            self.counters.handshakes_sent += 1;
            self.transmit(reply, now);
        }
    }

    fn accept_status(&mut self, envelope: Envelope, now: Timestamp) {
        match self.relay.store(envelope, Vec::new(), false, now) {
            StoreOutcome::Duplicate => return,
            StoreOutcome::Stored => self.counters.messages_stored += 1,
            StoreOutcome::StoredWithEviction { .. } => {
                self.counters.messages_stored += 1;
                self.counters.messages_evicted += 1;
            }
        }
        if self.endpoint_available() {
            self.deliver_stored(now);
        }
    }

    fn accept_relay(&mut self, sender: &str, relay: RelayPayload, now: Timestamp) -> Disposition {
        self.counters.relays_received += 1;
        let original = *relay.original;
        let own_id = self.codec.device_id();

        if self.codec.is_own(&original) || relay.chain.iter().any(|h| h.device_id == own_id) {
            self.counters.relay_loops_dropped += 1;
            tracing::warn!(
                origin = %original.source.device_id,
                msg_id = original.msg_id,
                via = %sender,
                "Relay loop detected, dropping"
            );
            return Disposition::Dropped(DropReason::RelayLoop);
        }
        if let Err(e) = self.authenticate(&original) {
            self.counters.auth_failures += 1;
            tracing::debug!(error = %e, via = %sender, "Dropping relay with unauthenticated original");
            return Disposition::Dropped(DropReason::Auth);
        }

        let origin = original.source.device_id.clone();
        let msg_id = original.msg_id;
        self.publish_serial(UplinkRecord::Relay {
            direction: RelayDirection::Received,
            origin: origin.clone(),
            msg_id,
            peer: sender.to_string(),
            hop_count: relay.chain.len(),
        });

        match self.relay.store(original, relay.chain, false, now) {
            StoreOutcome::Duplicate => {}
            outcome => {
                self.counters.messages_stored += 1;
                if matches!(outcome, StoreOutcome::StoredWithEviction { .. }) {
                    self.counters.messages_evicted += 1;
                }
                self.relay.mark_attempted(&origin, msg_id, sender, now);
                if self.endpoint_available() {
                    self.deliver_stored(now);
                }
            }
        }
        Disposition::Routed(MessageKind::Relay)
    }

    fn send_envelope(&mut self, dest: Destination, envelope: &Envelope) -> MeshResult<()> {
        let bytes = self.codec.encode(envelope)?;
        self.radio.ensure_broadcast_active()?;
        self.radio.send(dest, &bytes)?;
        Ok(())
    }

    /// Seal and send; failures are counted and logged.
    fn transmit(&mut self, outbound: Outbound, now: Timestamp) -> Envelope {
        let envelope = self.codec.seal(outbound.payload, now);
        if !self.mesh_enabled() {
            tracing::debug!(kind = %envelope.kind(), "Broadcast transport disabled in this mode");
            return envelope;
        }
        match self.send_envelope(outbound.dest, &envelope) {
            Ok(()) => self.counters.frames_sent += 1,
            Err(e) => {
                self.counters.send_failures += 1;
                tracing::warn!(kind = %envelope.kind(), error = %e, "Send failed");
            }
        }
        envelope
    }

    fn publish_serial(&mut self, record: UplinkRecord) {
        if let Some(serial) = self.serial.as_mut() {
            if let Err(e) = serial.publish(&record) {
                self.counters.uplink_failures += 1;
                tracing::debug!(error = %e, "Serial uplink write failed");
            }
        }
    }

    /// Switch to infra and hand every undelivered message to the endpoint.
    fn deliver_stored(&mut self, now: Timestamp) -> usize {
        if self.relay.undelivered_count() == 0 {
            return 0;
        }
        let Some(endpoint) = self.endpoint.as_mut() else {
            return 0;
        };

        let delivered = match self.radio.enable_infra_mode() {
            Ok(true) => {
                let reachable = self.radio.link_status().endpoint_reachable;
                self.relay.attempt_direct_delivery(reachable, &mut **endpoint, now)
            }
            Ok(false) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "Could not bring infra up for delivery");
                0
            }
        };
        self.counters.messages_delivered += delivered as u64;

        if self.modes.current().uses_broadcast() {
            if let Err(e) = self.radio.ensure_broadcast_active() {
                tracing::warn!(error = %e, "Broadcast transport not restored after delivery");
            }
        }
        delivered
    }

    /// Run every periodic task that is due; returns the tasks run.
    pub fn tick(&mut self) -> Vec<Task> {
        let now = self.clock.now_ms();
        let due = self.scheduler.due(now);
        for task in &due {
            self.run_task(*task, now);
        }
        due
    }

    fn run_task(&mut self, task: Task, now: Timestamp) {
        match task {
            Task::ModeCheck => self.check_mode(now),
            Task::Prune => {
                let removed = self.peers.prune(self.config.timing.peer_stale_ms, now);
                if !removed.is_empty() {
                    tracing::info!(removed = removed.len(), remaining = self.peers.len(), "Pruned stale peers");
                }
            }
            Task::Expire => {
                self.counters.messages_expired += self.relay.expire(now) as u64;
            }
            Task::Discovery if self.mesh_enabled() => {
                let status = self.status_report(now);
                let ping = self.discovery.build_ping(status);
                self.transmit(ping, now);
                let local = self.local_advert();
                for request in self.discovery.tick(&mut self.peers, local, now) {
                    self.counters.handshakes_sent += 1;
                    self.transmit(request, now);
                }
            }
            Task::Positioning if self.mesh_enabled() => {
                let ping = self.positioning.build_ping(POSITIONING_TX_POWER_DBM);
                self.transmit(Outbound::broadcast(ping), now);
                let pass = self.positioning.tick(&mut self.peers, now);
                if !pass.entries.is_empty() {
                    self.share_distances(pass.entries, now);
                }
            }
            Task::RelayCheck => {
                if self.endpoint_available() {
                    self.deliver_stored(now);
                } else if self.mesh_enabled() {
                    self.relay_stored(now);
                }
            }
            Task::Status => {
                self.report(now);
            }
            Task::Discovery | Task::Positioning => {}
        }
    }

    fn check_mode(&mut self, now: Timestamp) {
        let status = match self.radio.check_infra() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "Infra check failed");
                Default::default()
            }
        };
        self.modes.evaluate(status, now);

        if self.endpoint_available() {
            self.deliver_stored(now);
        }
        if self.mesh_enabled() {
            if let Err(e) = self.radio.ensure_broadcast_active() {
                tracing::warn!(error = %e, "Broadcast transport not restored after infra check");
            }
        }
    }

    fn relay_stored(&mut self, now: Timestamp) {
        for request in self.relay.check_relay_opportunities(&self.peers, now) {
            if let (Destination::Unicast(to), Payload::Relay(relay)) = (&request.dest, &request.payload) {
                let peer = self
                    .peers
                    .iter()
                    .find(|(_, p)| p.address == *to)
                    .map(|(_, p)| p.device_id.clone())
                    .unwrap_or_else(|| to.to_string());
                self.publish_serial(UplinkRecord::Relay {
                    direction: RelayDirection::Sent,
                    origin: relay.original.source.device_id.clone(),
                    msg_id: relay.original.msg_id,
                    peer,
                    hop_count: relay.hop_count(),
                });
            }
            self.counters.relays_sent += 1;
            self.transmit(request, now);
        }
    }

    fn share_distances(&mut self, mut entries: Vec<DistanceEntry>, now: Timestamp) {
        let device_id = self.codec.device_id().to_string();
        self.publish_serial(UplinkRecord::Distances {
            device_id,
            entries: entries.clone(),
        });

        let budget = self.codec.max_frame().saturating_sub(DISTANCE_ENVELOPE_OVERHEAD) / DISTANCE_ENTRY_BYTES;
        entries.truncate(budget.max(1));
        self.transmit(Outbound::broadcast(Payload::Distance(DistancePayload { entries })), now);
    }

    /// Originate a status report now.
    ///
    /// The report is broadcast and stored as this node's own message so it
    /// reaches the endpoint directly or through a relay.
    pub fn originate_report(&mut self) -> Envelope {
        let now = self.clock.now_ms();
        self.report(now)
    }

    fn report(&mut self, now: Timestamp) -> Envelope {
        self.report_seq = self.report_seq.wrapping_add(1);
        let mut status = self.status_report(now);
        status.seq = self.report_seq;

        let envelope = self.transmit(Outbound::broadcast(Payload::Data(status)), now);
        match self.relay.store(envelope.clone(), Vec::new(), true, now) {
            StoreOutcome::Duplicate => {}
            StoreOutcome::Stored => self.counters.messages_stored += 1,
            StoreOutcome::StoredWithEviction { .. } => {
                self.counters.messages_stored += 1;
                self.counters.messages_evicted += 1;
            }
        }

        // Endpoint-capable neighbours heard the broadcast and deliver it themselves
        if self.mesh_enabled() {
            let carriers: Vec<DeviceId> = self
                .peers
                .trusted()
                .filter(|p| p.offers_endpoint())
                .map(|p| p.device_id.clone())
                .collect();
            for carrier in carriers {
                self.relay.mark_attempted(&envelope.source.device_id, envelope.msg_id, &carrier, now);
            }
        }

        if self.endpoint_available() {
            self.deliver_stored(now);
        }

        let status = self.status();
        self.publish_serial(UplinkRecord::Status {
            device_id: status.device_id,
            owner: status.owner,
            mode: status.mode,
            uptime_s: status.uptime_s,
            peers: status.peers,
            trusted_peers: status.trusted_peers,
            stored: status.stored,
            undelivered: status.undelivered,
            counters: status.counters,
        });
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlink_core::{InfraNetwork, ManualClock};
    use swarmlink_radio::{SimAir, SimRadio};

    use crate::envelope::HandshakePayload;
    use crate::uplink::MemoryUplink;

    fn addr(last: u8) -> RadioAddress {
        RadioAddress::new([2, 0, 0, 0, 0, last])
    }

    fn create_test_config(id: &str) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.identity.device_id = id.to_string();
        config.identity.owner = "alice".to_string();
        config.radio.settle_ms = 0;
        config
    }

    fn create_test_node(air: &SimAir, id: &str, octet: u8, clock: &ManualClock) -> MeshNode<SimRadio> {
        let radio = air.radio(addr(octet));
        let mut node = MeshNode::new(create_test_config(id), radio, Arc::new(clock.clone()))
            .unwrap()
            .with_first_msg_id(u32::from(octet) * 1_000);
        node.start().unwrap();
        node
    }

    fn sealed(codec: &mut EnvelopeCodec, payload: Payload, now: Timestamp) -> ReceivedFrame {
        let env = codec.seal(payload, now);
        ReceivedFrame {
            from: env.source.address,
            rssi: -50,
            data: codec.encode(&env).unwrap(),
        }
    }

    fn remote_codec(id: &str, octet: u8, key: &str) -> EnvelopeCodec {
        let source = SourceDescriptor {
            device_id: id.to_string(),
            owner: "bob".to_string(),
            address: addr(octet),
            device_type: "mesh".to_string(),
            firmware: "0.3.0".to_string(),
        };
        EnvelopeCodec::new(source, key, 1470).with_first_msg_id(1)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let air = SimAir::new();
        let mut config = create_test_config("");
        config.identity.device_id.clear();
        let result = MeshNode::new(config, air.radio(addr(1)), Arc::new(ManualClock::new(0)));
        assert!(matches!(result, Err(MeshError::Config(_))));
    }

    #[test]
    fn test_drops_garbage_own_and_wrong_key() {
        let air = SimAir::new();
        let clock = ManualClock::new(0);
        let mut node = create_test_node(&air, "node-a", 1, &clock);

        let garbage = ReceivedFrame {
            from: addr(9),
            rssi: -50,
            data: b"\x00\x01not-json".to_vec(),
        };
        assert_eq!(node.handle_frame(&garbage), Disposition::Dropped(DropReason::Decode));

        let mut own = remote_codec("node-a", 9, "swarmlink-prekey");
        let frame = sealed(&mut own, Payload::Ping(StatusReport::default()), 0);
        assert_eq!(node.handle_frame(&frame), Disposition::Dropped(DropReason::OwnFrame));

        let mut intruder = remote_codec("node-x", 9, "wrong-key");
        let frame = sealed(&mut intruder, Payload::Ping(StatusReport::default()), 0);
        assert_eq!(node.handle_frame(&frame), Disposition::Dropped(DropReason::Auth));

        assert!(node.peers().is_empty());
        let counters = node.counters();
        assert_eq!(counters.decode_errors, 1);
        assert_eq!(counters.own_frames, 1);
        assert_eq!(counters.auth_failures, 1);
        assert!(air.sent(addr(1)).is_empty());
    }

    #[test]
    fn test_ping_gets_one_handshake_within_cooldown() {
        let air = SimAir::new();
        let clock = ManualClock::new(0);
        let mut node = create_test_node(&air, "node-a", 1, &clock);
        let key = node.config().security.shared_key.clone();
        let mut remote = remote_codec("node-b", 2, &key);

        let first = sealed(&mut remote, Payload::Ping(StatusReport::default()), 0);
        assert_eq!(node.handle_frame(&first), Disposition::Routed(MessageKind::Ping));
        clock.advance(5_000);
        let second = sealed(&mut remote, Payload::Ping(StatusReport::default()), 5_000);
        node.handle_frame(&second);

        let sent = air.sent(addr(1));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Destination::Unicast(addr(2)));
        let reply = remote.decode(&sent[0].1).unwrap();
        assert!(matches!(
            reply.payload,
            Payload::Handshake(HandshakePayload { reply_to: Some(1), ok: true, .. })
        ));
        assert!(node.peers().get_by_id("node-b").unwrap().is_trusted());
    }

    #[test]
    fn test_relay_containing_self_is_dropped() {
        let air = SimAir::new();
        let clock = ManualClock::new(0);
        let mut node = create_test_node(&air, "node-a", 1, &clock);
        let key = node.config().security.shared_key.clone();
        let mut origin = remote_codec("node-c", 3, &key);
        let mut relayer = remote_codec("node-b", 2, &key);

        let original = origin.seal(Payload::Data(StatusReport::default()), 0);
        let chain = vec![crate::envelope::RelayHop {
            device_id: "node-a".to_string(),
            owner: "alice".to_string(),
            timestamp: 0,
            rssi: -60,
        }];
        let frame = sealed(
            &mut relayer,
            Payload::Relay(RelayPayload {
                original: Box::new(original),
                chain,
            }),
            0,
        );

        assert_eq!(node.handle_frame(&frame), Disposition::Dropped(DropReason::RelayLoop));
        assert!(node.relay_store().is_empty());
        assert_eq!(node.counters().relay_loops_dropped, 1);
    }

    #[test]
    fn test_report_is_broadcast_and_stored() {
        let air = SimAir::new();
        let clock = ManualClock::new(0);
        let serial = MemoryUplink::new();
        let mut node = create_test_node(&air, "node-a", 1, &clock).with_serial_uplink(serial.clone());

        let env = node.originate_report();
        assert_eq!(env.kind(), MessageKind::Data);
        let stored = node.relay_store().get("node-a", env.msg_id).unwrap();
        assert!(stored.is_own);
        assert_eq!(stored.hop_count(), 0);
        assert_eq!(air.sent(addr(1)).len(), 1);
        assert!(matches!(serial.records().last(), Some(UplinkRecord::Status { .. })));
    }

    #[test]
    fn test_infra_only_node_stays_off_mesh() {
        let air = SimAir::new();
        let clock = ManualClock::new(0);
        let mut config = create_test_config("node-a");
        config.infra.networks = vec![InfraNetwork {
            ssid: "lab".to_string(),
            password: "secret".to_string(),
        }];
        config.infra.preference = swarmlink_core::ModePreference::EndpointOnly;
        air.set_infra(addr(1), true, true);
        let endpoint = MemoryUplink::new();
        let mut node = MeshNode::new(config, air.radio(addr(1)), Arc::new(clock.clone()))
            .unwrap()
            .with_endpoint_uplink(endpoint.clone());
        node.start().unwrap();

        let tasks = node.tick();
        assert!(tasks.contains(&Task::Discovery));
        assert_eq!(node.mode(), CommMode::InfraOnly);
        // Status report went straight to the endpoint, nothing on the mesh
        assert!(air.sent(addr(1)).is_empty());
        assert_eq!(endpoint.delivered().len(), 1);
        assert!(node.relay_store().is_empty());
    }

    #[test]
    fn test_infra_only_node_falls_back_when_infra_is_lost() {
        let air = SimAir::new();
        let clock = ManualClock::new(0);
        let mut config = create_test_config("node-a");
        config.infra.networks = vec![InfraNetwork {
            ssid: "lab".to_string(),
            password: "secret".to_string(),
        }];
        config.infra.preference = swarmlink_core::ModePreference::EndpointOnly;
        air.set_infra(addr(1), true, true);
        let mut node = MeshNode::new(config, air.radio(addr(1)), Arc::new(clock.clone()))
            .unwrap()
            .with_endpoint_uplink(MemoryUplink::new());
        node.start().unwrap();
        node.tick();
        assert_eq!(node.mode(), CommMode::InfraOnly);

        air.set_infra(addr(1), false, false);
        clock.advance(10_000);
        node.tick();
        // Still inside the dwell window, but the link itself is refreshed
        assert_eq!(node.mode(), CommMode::InfraOnly);
        assert!(!node.radio().link_status().infra_connected);
        assert!(!node.endpoint_available());

        for _ in 0..2 {
            clock.advance(10_000);
            node.tick();
        }
        assert_eq!(node.mode(), CommMode::BroadcastOnly);
        assert_eq!(node.radio().active(), swarmlink_radio::ActiveTransport::Broadcast);
        assert!(!air.sent(addr(1)).is_empty());
    }
}
