//! Discovery and handshake
//!
//! Nodes announce themselves with periodic pings. A validated ping or status
//! envelope is enough to trust its sender (the shared key was checked by the
//! codec); the receiver answers with a handshake so the sender learns about
//! it too. Peers heard only through other traffic get handshake requests on
//! the discovery tick until they answer or run out of attempts.

use swarmlink_core::Timestamp;
use swarmlink_radio::CommMode;

use crate::envelope::{Capabilities, Envelope, HandshakePayload, Outbound, Payload, StatusReport};
use crate::peer::{PeerSlot, PeerTable};

/// What this node advertises in handshakes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalAdvert {
    pub caps: Capabilities,
    pub mode: CommMode,
}

#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    handshake_cooldown_ms: u64,
    max_attempts: u8,
    ping_seq: u32,
}

impl DiscoveryEngine {
    pub fn new(handshake_cooldown_ms: u64, max_attempts: u8) -> Self {
        Self {
            handshake_cooldown_ms,
            max_attempts,
            ping_seq: 0,
        }
    }

    /// Discovery broadcast carrying this node's status
    pub fn build_ping(&mut self, mut status: StatusReport) -> Outbound {
        self.ping_seq = self.ping_seq.wrapping_add(1);
        status.seq = self.ping_seq;
        Outbound::broadcast(Payload::Ping(status))
    }

    /// React to a validated envelope from the peer in `slot`.
    ///
    /// Returns the handshake to send back, if any.
    pub fn on_envelope(
        &mut self,
        envelope: &Envelope,
        slot: PeerSlot,
        peers: &mut PeerTable,
        local: LocalAdvert,
        now: Timestamp,
    ) -> Option<Outbound> {
        let peer = peers.get_mut(slot)?;

        let should_answer = match &envelope.payload {
            Payload::Ping(status) | Payload::Data(status) => {
                peer.capabilities = status.caps;
                peer.preferred_mode = status.mode;
                true
            }
            Payload::Handshake(handshake) => {
                peer.capabilities = handshake.caps;
                peer.preferred_mode = handshake.mode;
                if !handshake.ok {
                    tracing::debug!(device_id = %peer.device_id, "Peer declined handshake");
                    return None;
                }
                // Replies are never answered
                handshake.reply_to.is_none()
            }
            _ => return None,
        };

        if !peer.is_trusted() {
            tracing::info!(device_id = %peer.device_id, kind = %envelope.kind(), "Peer trusted");
        }
        peer.trust();

        if !should_answer || !peer.handshake_allowed(self.handshake_cooldown_ms, now) {
            return None;
        }
        peer.last_handshake_sent = Some(now);
        tracing::debug!(device_id = %peer.device_id, reply_to = envelope.msg_id, "Sending handshake reply");
        Some(Outbound::unicast(
            peer.address,
            Payload::Handshake(HandshakePayload {
                reply_to: Some(envelope.msg_id),
                ok: true,
                caps: local.caps,
                mode: local.mode,
            }),
        ))
    }

    /// Handshake requests to peers that have not completed one yet.
    ///
    /// A peer that used up its attempts is marked untrusted and skipped
    /// until a fresh ping trusts it again.
    pub fn tick(&mut self, peers: &mut PeerTable, local: LocalAdvert, now: Timestamp) -> Vec<Outbound> {
        let mut requests = Vec::new();
        for (_, peer) in peers.iter_mut() {
            if peer.is_trusted() || peer.untrusted {
                continue;
            }
            if peer.handshake_attempts >= self.max_attempts {
                peer.untrusted = true;
                tracing::warn!(
                    device_id = %peer.device_id,
                    attempts = peer.handshake_attempts,
                    "Handshake attempts exhausted, peer untrusted"
                );
                continue;
            }
            if !peer.handshake_allowed(self.handshake_cooldown_ms, now) {
                continue;
            }

            peer.handshake_attempts += 1;
            peer.last_handshake_sent = Some(now);
            requests.push(Outbound::unicast(
                peer.address,
                Payload::Handshake(HandshakePayload {
                    reply_to: None,
                    ok: true,
                    caps: local.caps,
                    mode: local.mode,
                }),
            ));
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeCodec, PositioningPayload, SourceDescriptor};
    use swarmlink_radio::{Destination, RadioAddress};

    const COOLDOWN: u64 = 30_000;

    fn create_test_codec(id: &str, octet: u8) -> EnvelopeCodec {
        let source = SourceDescriptor {
            device_id: id.to_string(),
            owner: "alice".to_string(),
            address: RadioAddress::new([2, 0, 0, 0, 0, octet]),
            device_type: "mesh".to_string(),
            firmware: "0.3.0".to_string(),
        };
        EnvelopeCodec::new(source, "prekey", 1470).with_first_msg_id(1)
    }

    fn local() -> LocalAdvert {
        LocalAdvert {
            caps: Capabilities::RELAY,
            mode: CommMode::BroadcastOnly,
        }
    }

    fn receive(table: &mut PeerTable, env: &Envelope, now: Timestamp) -> PeerSlot {
        table.upsert(&env.source, -50, now).slot().unwrap()
    }

    #[test]
    fn test_ping_trusts_and_replies() {
        let mut engine = DiscoveryEngine::new(COOLDOWN, 3);
        let mut table = PeerTable::new("node-a", 8, 10);
        let mut remote = create_test_codec("node-b", 2);
        let ping = remote.seal(Payload::Ping(StatusReport::default()), 0);

        let slot = receive(&mut table, &ping, 0);
        let reply = engine.on_envelope(&ping, slot, &mut table, local(), 0).unwrap();

        assert_eq!(reply.dest, Destination::Unicast(RadioAddress::new([2, 0, 0, 0, 0, 2])));
        match reply.payload {
            Payload::Handshake(h) => assert_eq!(h.reply_to, Some(ping.msg_id)),
            other => panic!("Expected handshake, got {:?}", other),
        }
        assert!(table.get(slot).unwrap().is_trusted());
    }

    #[test]
    fn test_two_pings_within_cooldown_one_reply() {
        let mut engine = DiscoveryEngine::new(COOLDOWN, 3);
        let mut table = PeerTable::new("node-a", 8, 10);
        let mut remote = create_test_codec("node-b", 2);

        let first = remote.seal(Payload::Ping(StatusReport::default()), 0);
        let second = remote.seal(Payload::Ping(StatusReport::default()), 5_000);
        let slot = receive(&mut table, &first, 0);

        assert!(engine.on_envelope(&first, slot, &mut table, local(), 0).is_some());
        assert!(engine.on_envelope(&second, slot, &mut table, local(), 5_000).is_none());

        let third = remote.seal(Payload::Ping(StatusReport::default()), COOLDOWN + 1);
        assert!(engine.on_envelope(&third, slot, &mut table, local(), COOLDOWN + 1).is_some());
    }

    #[test]
    fn test_handshake_reply_is_not_answered() {
        let mut engine = DiscoveryEngine::new(COOLDOWN, 3);
        let mut table = PeerTable::new("node-a", 8, 10);
        let mut remote = create_test_codec("node-b", 2);
        let reply = remote.seal(
            Payload::Handshake(HandshakePayload {
                reply_to: Some(41),
                ok: true,
                caps: Capabilities::ENDPOINT,
                mode: CommMode::InfraBackup,
            }),
            0,
        );

        let slot = receive(&mut table, &reply, 0);
        assert!(engine.on_envelope(&reply, slot, &mut table, local(), 0).is_none());
        let peer = table.get(slot).unwrap();
        assert!(peer.is_trusted());
        assert!(peer.capabilities.contains(Capabilities::ENDPOINT));
        assert_eq!(peer.preferred_mode, CommMode::InfraBackup);
    }

    #[test]
    fn test_handshake_request_is_answered() {
        let mut engine = DiscoveryEngine::new(COOLDOWN, 3);
        let mut table = PeerTable::new("node-a", 8, 10);
        let mut remote = create_test_codec("node-b", 2);
        let request = remote.seal(
            Payload::Handshake(HandshakePayload {
                reply_to: None,
                ok: true,
                ..Default::default()
            }),
            0,
        );

        let slot = receive(&mut table, &request, 0);
        let answer = engine.on_envelope(&request, slot, &mut table, local(), 0).unwrap();
        assert!(matches!(answer.payload, Payload::Handshake(HandshakePayload { reply_to: Some(1), .. })));
    }

    #[test]
    fn test_tick_requests_until_exhausted() {
        let mut engine = DiscoveryEngine::new(COOLDOWN, 2);
        let mut table = PeerTable::new("node-a", 8, 10);
        let mut remote = create_test_codec("node-b", 2);
        let positioning = remote.seal(Payload::Positioning(PositioningPayload::default()), 0);
        let slot = receive(&mut table, &positioning, 0);

        // Positioning alone does not trust
        assert!(engine.on_envelope(&positioning, slot, &mut table, local(), 0).is_none());
        assert!(!table.get(slot).unwrap().is_trusted());

        assert_eq!(engine.tick(&mut table, local(), 0).len(), 1);
        assert!(engine.tick(&mut table, local(), 10_000).is_empty());
        assert_eq!(engine.tick(&mut table, local(), COOLDOWN).len(), 1);
        assert!(engine.tick(&mut table, local(), COOLDOWN * 2).is_empty());
        assert!(table.get(slot).unwrap().untrusted);

        // A fresh ping brings the peer back
        let ping = remote.seal(Payload::Ping(StatusReport::default()), COOLDOWN * 3);
        engine.on_envelope(&ping, slot, &mut table, local(), COOLDOWN * 3);
        let peer = table.get(slot).unwrap();
        assert!(peer.is_trusted());
        assert!(!peer.untrusted);
        assert_eq!(peer.handshake_attempts, 0);
    }

    #[test]
    fn test_ping_seq_increments() {
        let mut engine = DiscoveryEngine::new(COOLDOWN, 3);
        let first = engine.build_ping(StatusReport::default());
        let second = engine.build_ping(StatusReport::default());
        match (first.payload, second.payload) {
            (Payload::Ping(a), Payload::Ping(b)) => assert_eq!(b.seq, a.seq + 1),
            other => panic!("Expected pings, got {:?}", other),
        }
        assert_eq!(first.dest, Destination::Broadcast);
    }
}
