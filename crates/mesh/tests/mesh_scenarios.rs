//! Multi-node scenarios over the simulated medium
//!
//! Nodes share a `SimAir`; frames are pumped between them by draining each
//! station's inbox into its node, with a manual clock driving the schedule.

use std::sync::Arc;
use swarmlink_core::{InfraNetwork, ManualClock, ModePreference, NodeConfig};
use swarmlink_mesh::{Capabilities, Direction, MemoryUplink, MeshNode, MessageKind, UplinkRecord};
use swarmlink_radio::{CommMode, RadioAddress, SimAir, SimRadio};

fn addr(last: u8) -> RadioAddress {
    RadioAddress::new([2, 0, 0, 0, 0, last])
}

fn create_test_config(id: &str) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.identity.device_id = id.to_string();
    config.identity.owner = format!("owner-{}", id);
    config.radio.settle_ms = 0;
    config
}

fn infra_config(id: &str) -> NodeConfig {
    let mut config = create_test_config(id);
    config.infra.networks = vec![InfraNetwork {
        ssid: "field-ap".to_string(),
        password: "secret".to_string(),
    }];
    config.infra.endpoint = Some("127.0.0.1:9000".to_string());
    config
}

struct Mesh {
    air: SimAir,
    clock: ManualClock,
    nodes: Vec<MeshNode<SimRadio>>,
}

impl Mesh {
    fn new() -> Self {
        Self {
            air: SimAir::new(),
            clock: ManualClock::new(1_000_000),
            nodes: Vec::new(),
        }
    }

    fn add(&mut self, config: NodeConfig, octet: u8, endpoint: Option<MemoryUplink>) -> usize {
        let radio = self.air.radio(addr(octet));
        let mut node = MeshNode::new(config, radio, Arc::new(self.clock.clone()))
            .unwrap()
            .with_first_msg_id(u32::from(octet) * 10_000);
        if let Some(endpoint) = endpoint {
            node = node.with_endpoint_uplink(endpoint);
        }
        node.start().unwrap();
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Deliver queued frames until the air is quiet
    fn pump(&mut self) {
        for _ in 0..16 {
            let mut moved = false;
            for node in self.nodes.iter_mut() {
                for frame in self.air.drain(node.address()) {
                    moved = true;
                    node.handle_frame(&frame);
                }
            }
            if !moved {
                return;
            }
        }
    }

    fn tick_all(&mut self) {
        for node in self.nodes.iter_mut() {
            node.tick();
        }
        self.pump();
    }

    fn advance(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.tick_all();
    }

    fn sent_kinds(&self, octet: u8) -> Vec<MessageKind> {
        self.air
            .sent(addr(octet))
            .iter()
            .filter_map(|(_, bytes)| decode_kind(bytes))
            .collect()
    }
}

fn decode_kind(bytes: &[u8]) -> Option<MessageKind> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value["m"].as_u64().and_then(|code| MessageKind::from_code(code as u8))
}

#[test]
fn test_nodes_discover_and_trust_each_other() {
    let mut mesh = Mesh::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    let b = mesh.add(create_test_config("node-b"), 2, None);

    mesh.tick_all();

    for (me, other) in [(a, "node-b"), (b, "node-a")] {
        let peer = mesh.nodes[me].peers().get_by_id(other).unwrap();
        assert!(peer.is_trusted(), "{} should trust {}", mesh.nodes[me].device_id(), other);
        assert!(peer.position.valid);
    }
    assert!(mesh.sent_kinds(1).contains(&MessageKind::Handshake));
}

#[test]
fn test_endpoint_node_delivers_neighbour_status_directly() {
    let mut mesh = Mesh::new();
    let endpoint = MemoryUplink::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    let b = mesh.add(infra_config("node-b"), 2, Some(endpoint.clone()));
    mesh.air.set_infra(addr(2), true, true);

    mesh.tick_all();
    assert_eq!(mesh.nodes[b].mode(), CommMode::InfraBackup);
    assert!(mesh.nodes[b].endpoint_available());

    let report = mesh.nodes[a].originate_report();
    mesh.pump();

    let delivered: Vec<_> = endpoint
        .delivered()
        .into_iter()
        .filter_map(|r| match r {
            UplinkRecord::Delivered { envelope, hop_count, via, .. } if envelope.device_id() == "node-a" => {
                Some((envelope.msg_id, hop_count, via))
            }
            _ => None,
        })
        .collect();
    assert!(delivered.contains(&(report.msg_id, 0, "node-b".to_string())));
    assert!(mesh.nodes[b].relay_store().get("node-a", report.msg_id).is_none());
    assert!(!mesh.sent_kinds(2).contains(&MessageKind::Relay));
}

#[test]
fn test_status_reaches_endpoint_through_relay() {
    let mut mesh = Mesh::new();
    let endpoint = MemoryUplink::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    let _b = mesh.add(create_test_config("node-b"), 2, None);
    let c = mesh.add(infra_config("node-c"), 3, Some(endpoint.clone()));
    mesh.air.set_infra(addr(3), true, true);
    // A only hears B; B hears both
    mesh.air.set_out_of_range(addr(1), addr(3));

    // Discovery round and first reports; B learns that C has the endpoint
    mesh.tick_all();
    mesh.advance(10_000);
    assert!(mesh.nodes[1]
        .peers()
        .get_by_id("node-c")
        .unwrap()
        .capabilities
        .contains(Capabilities::ENDPOINT));

    let report = mesh.nodes[a].originate_report();
    mesh.pump();
    assert!(mesh.nodes[1].relay_store().contains("node-a", report.msg_id));

    // B's relay check hands the report to C
    mesh.advance(15_000);
    mesh.advance(15_000);

    let hops: Vec<usize> = endpoint
        .delivered()
        .into_iter()
        .filter_map(|r| match r {
            UplinkRecord::Delivered { envelope, hop_count, chain, .. }
                if envelope.device_id() == "node-a" && envelope.msg_id == report.msg_id =>
            {
                assert!(chain.iter().any(|h| h.device_id == "node-b"));
                Some(hop_count)
            }
            _ => None,
        })
        .collect();
    assert_eq!(hops.len(), 1, "report delivered exactly once");
    assert!(hops[0] >= 1);
    assert!(mesh.sent_kinds(2).contains(&MessageKind::Relay));
    assert!(mesh.nodes[c].status().counters.relays_received >= 1);
}

fn delivered_hops(endpoint: &MemoryUplink, origin: &str, msg_id: u32) -> Vec<usize> {
    endpoint
        .delivered()
        .into_iter()
        .filter_map(|r| match r {
            UplinkRecord::Delivered { envelope, hop_count, .. }
                if envelope.device_id() == origin && envelope.msg_id == msg_id =>
            {
                Some(hop_count)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_lost_relay_is_retried_after_cooldown() {
    let mut mesh = Mesh::new();
    let endpoint = MemoryUplink::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    let _b = mesh.add(create_test_config("node-b"), 2, None);
    let _c = mesh.add(infra_config("node-c"), 3, Some(endpoint.clone()));
    mesh.air.set_infra(addr(3), true, true);
    mesh.air.set_out_of_range(addr(1), addr(3));

    mesh.tick_all();
    mesh.advance(10_000);

    // The first hand-off from B to C is lost
    mesh.air.set_out_of_range(addr(2), addr(3));
    let report = mesh.nodes[a].originate_report();
    mesh.pump();
    mesh.advance(5_000);
    assert!(mesh.sent_kinds(2).contains(&MessageKind::Relay));
    assert!(delivered_hops(&endpoint, "node-a", report.msg_id).is_empty());

    mesh.air.set_link_rssi(addr(2), addr(3), -55);
    // Still inside the retry cooldown
    mesh.advance(15_000);
    assert!(delivered_hops(&endpoint, "node-a", report.msg_id).is_empty());

    mesh.advance(15_000);
    let hops = delivered_hops(&endpoint, "node-a", report.msg_id);
    assert_eq!(hops.len(), 1);
    assert!(hops[0] >= 1);
    assert!(!mesh.nodes[1].relay_store().get("node-a", report.msg_id).unwrap().delivered);
}

#[test]
fn test_infra_only_node_rejoins_mesh_after_infra_loss() {
    let mut mesh = Mesh::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    let mut config = infra_config("node-b");
    config.infra.preference = ModePreference::EndpointOnly;
    mesh.air.set_infra(addr(2), true, true);
    let b = mesh.add(config, 2, Some(MemoryUplink::new()));

    mesh.tick_all();
    assert_eq!(mesh.nodes[b].mode(), CommMode::InfraOnly);
    assert!(mesh.nodes[a].peers().get_by_id("node-b").is_none());

    mesh.air.set_infra(addr(2), false, false);
    mesh.advance(10_000);
    assert_eq!(mesh.nodes[b].mode(), CommMode::InfraOnly);
    assert!(!mesh.nodes[b].endpoint_available());

    // Dwell window passed: back on the mesh and discovered
    mesh.advance(10_000);
    mesh.advance(10_000);
    assert_eq!(mesh.nodes[b].mode(), CommMode::BroadcastOnly);
    assert!(mesh.nodes[a].peers().get_by_id("node-b").unwrap().is_trusted());
    assert!(mesh.nodes[b].peers().get_by_id("node-a").unwrap().is_trusted());
}

#[test]
fn test_directions_assigned_with_three_trusted_peers() {
    let mut mesh = Mesh::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    for (octet, rssi) in [(2, -45), (3, -60), (4, -75)] {
        mesh.add(create_test_config(&format!("node-{}", octet)), octet, None);
        mesh.air.set_link_rssi(addr(1), addr(octet), rssi);
    }

    mesh.tick_all();
    mesh.advance(5_000);

    let peers = mesh.nodes[a].peers();
    assert_eq!(peers.trusted_count(), 3);
    assert_eq!(peers.get_by_id("node-2").unwrap().position.direction, Direction::N);
    assert_eq!(peers.get_by_id("node-3").unwrap().position.direction, Direction::NE);
    assert_eq!(peers.get_by_id("node-4").unwrap().position.direction, Direction::E);
    assert!(mesh.sent_kinds(1).contains(&MessageKind::Distance));
}

#[test]
fn test_silent_peer_is_pruned() {
    let mut mesh = Mesh::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    mesh.add(create_test_config("node-b"), 2, None);
    mesh.tick_all();
    assert_eq!(mesh.nodes[a].peers().len(), 1);

    mesh.air.set_out_of_range(addr(1), addr(2));
    for _ in 0..5 {
        mesh.advance(30_000);
    }
    assert!(mesh.nodes[a].peers().is_empty());
}

#[test]
fn test_forged_key_never_trusted() {
    let mut mesh = Mesh::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    let mut rogue = create_test_config("rogue");
    rogue.security.shared_key = "guessed".to_string();
    mesh.add(rogue, 2, None);

    mesh.tick_all();
    mesh.advance(10_000);

    assert!(mesh.nodes[a].peers().get_by_id("rogue").is_none());
    assert!(mesh.nodes[a].counters().auth_failures > 0);
    assert!(!mesh.sent_kinds(1).contains(&MessageKind::Relay));
}

#[test]
fn test_unknown_kind_is_dropped() {
    let mut mesh = Mesh::new();
    let a = mesh.add(create_test_config("node-a"), 1, None);
    let frame = swarmlink_radio::ReceivedFrame {
        from: addr(7),
        rssi: -40,
        data: br#"{"v":"2.0","i":1,"ts":1,"k":"swarmlink-prekey","s":{"d":"n7"},"m":99,"p":{}}"#.to_vec(),
    };
    mesh.nodes[a].handle_frame(&frame);
    assert!(mesh.nodes[a].peers().is_empty());
    assert_eq!(mesh.nodes[a].counters().decode_errors, 1);
}
