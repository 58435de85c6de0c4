//! RSSI positioning
//!
//! Turns per-peer signal history into a distance estimate, a confidence and,
//! once enough trusted peers are in range, a coarse compass sector. Sectors
//! are a deterministic assignment by distance rank, not a bearing.

use serde::{Deserialize, Serialize};
use swarmlink_core::Timestamp;
use swarmlink_rf::{PathLossModel, Rssi};

use crate::envelope::{DistanceEntry, Payload, PositioningPayload};
use crate::peer::PeerTable;

/// Signal spread (dB standard deviation) at which confidence bottoms out
const CONFIDENCE_SPREAD_DB: f64 = 10.0;
const MIN_CONFIDENCE: f64 = 0.1;

/// Coarse sector, or unknown when too few peers are trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
    #[default]
    #[serde(rename = "?", alias = "unknown")]
    Unknown,
}

impl Direction {
    /// Sectors in assignment order
    pub const SECTORS: [Direction; 8] = [
        Direction::N,
        Direction::NE,
        Direction::E,
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::W,
        Direction::NW,
    ];

    /// Sector for the peer at `rank` in nearest-first order
    pub fn for_rank(rank: usize) -> Direction {
        Self::SECTORS[rank % Self::SECTORS.len()]
    }
}

/// Where a peer is relative to this node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RelativePosition {
    pub distance_m: f64,
    pub direction: Direction,
    /// 0.1..=1.0, falls as the signal spread grows
    pub confidence: f64,
    pub updated_at: Timestamp,
    pub valid: bool,
}

/// Outcome of one positioning pass
#[derive(Debug, Clone, Default)]
pub struct PositioningPass {
    /// Trusted peers with a valid estimate, nearest first
    pub entries: Vec<DistanceEntry>,
    pub directions_assigned: bool,
    /// Estimates dropped for going stale
    pub invalidated: usize,
}

#[derive(Debug, Clone)]
pub struct PositioningEngine {
    model: PathLossModel,
    min_peers_for_direction: usize,
    stale_after_ms: u64,
    seq: u32,
}

impl PositioningEngine {
    pub fn new(model: PathLossModel, min_peers_for_direction: usize, stale_after_ms: u64) -> Self {
        Self {
            model,
            min_peers_for_direction,
            stale_after_ms,
            seq: 0,
        }
    }

    pub fn model(&self) -> &PathLossModel {
        &self.model
    }

    /// Distance for a mean signal strength, clamped to the model's bounds
    pub fn range_from_signal(&self, rssi: f64) -> f64 {
        self.model.range_from_signal(rssi)
    }

    /// Append a sample to the peer's history and refresh its estimate.
    ///
    /// Returns the new position, or `None` for an unknown peer.
    pub fn update_peer_position(
        &self,
        peers: &mut PeerTable,
        device_id: &str,
        rssi: Rssi,
        now: Timestamp,
    ) -> Option<RelativePosition> {
        let peer = peers.get_by_id_mut(device_id)?;
        peer.signal.push(rssi);

        let mean = peer.signal.mean()?;
        let stddev = peer.signal.variance().unwrap_or(0.0).sqrt();
        let confidence = (1.0 - stddev / CONFIDENCE_SPREAD_DB).clamp(MIN_CONFIDENCE, 1.0);

        peer.position.distance_m = self.range_from_signal(mean);
        peer.position.confidence = confidence;
        peer.position.updated_at = now;
        peer.position.valid = true;
        Some(peer.position)
    }

    /// Broadcast used by neighbours to sample our signal
    pub fn build_ping(&mut self, tx_power: i8) -> Payload {
        self.seq = self.seq.wrapping_add(1);
        Payload::Positioning(PositioningPayload { seq: self.seq, tx_power })
    }

    /// Expire stale estimates and assign sectors by distance rank.
    pub fn tick(&mut self, peers: &mut PeerTable, now: Timestamp) -> PositioningPass {
        let mut pass = PositioningPass::default();

        for (_, peer) in peers.iter_mut() {
            if peer.position.valid && now.saturating_sub(peer.position.updated_at) > self.stale_after_ms {
                peer.position.valid = false;
                pass.invalidated += 1;
            }
            if !peer.is_trusted() || !peer.position.valid {
                peer.position.direction = Direction::Unknown;
            }
        }

        let mut ranked: Vec<(f64, usize)> = peers
            .iter()
            .filter(|(_, p)| p.is_trusted() && p.position.valid)
            .map(|(slot, p)| (p.position.distance_m, slot))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        pass.directions_assigned = ranked.len() >= self.min_peers_for_direction;
        for (rank, (_, slot)) in ranked.iter().enumerate() {
            let Some(peer) = peers.get_mut(*slot) else {
                continue;
            };
            peer.position.direction = if pass.directions_assigned {
                Direction::for_rank(rank)
            } else {
                Direction::Unknown
            };
            pass.entries.push(DistanceEntry {
                device_id: peer.device_id.clone(),
                distance_m: peer.position.distance_m as f32,
                direction: peer.position.direction,
                confidence: peer.position.confidence as f32,
            });
        }

        tracing::debug!(
            ranked = pass.entries.len(),
            directions = pass.directions_assigned,
            invalidated = pass.invalidated,
            "Positioning pass"
        );
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SourceDescriptor;
    use swarmlink_radio::RadioAddress;

    fn create_test_engine() -> PositioningEngine {
        PositioningEngine::new(PathLossModel::default(), 3, 60_000)
    }

    fn add_trusted_peer(table: &mut PeerTable, id: &str, octet: u8) {
        let source = SourceDescriptor {
            device_id: id.to_string(),
            owner: "alice".to_string(),
            address: RadioAddress::new([2, 0, 0, 0, 0, octet]),
            device_type: "mesh".to_string(),
            firmware: "0.3.0".to_string(),
        };
        table.upsert(&source, -50, 0);
        table.mark_trusted(id);
    }

    #[test]
    fn test_update_uses_window_mean() {
        let engine = create_test_engine();
        let mut table = PeerTable::new("self", 8, 10);
        add_trusted_peer(&mut table, "a", 1);

        engine.update_peer_position(&mut table, "a", -40, 10);
        let pos = engine.update_peer_position(&mut table, "a", -60, 20).unwrap();

        // mean -50 dBm with n=2 from -40 dBm @ 1 m
        assert!((pos.distance_m - 10f64.powf(0.5)).abs() < 1e-9);
        assert!(pos.valid);
        assert_eq!(pos.updated_at, 20);
        // stddev 10 dB floors the confidence
        assert!((pos.confidence - MIN_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_steady_signal_is_fully_confident() {
        let engine = create_test_engine();
        let mut table = PeerTable::new("self", 8, 10);
        add_trusted_peer(&mut table, "a", 1);
        for t in 0..5 {
            engine.update_peer_position(&mut table, "a", -55, t);
        }
        let pos = table.get_by_id("a").unwrap().position;
        assert_eq!(pos.confidence, 1.0);
    }

    #[test]
    fn test_unknown_peer_is_ignored() {
        let engine = create_test_engine();
        let mut table = PeerTable::new("self", 8, 10);
        assert!(engine.update_peer_position(&mut table, "ghost", -50, 0).is_none());
    }

    #[test]
    fn test_directions_need_minimum_trusted_peers() {
        let mut engine = create_test_engine();
        let mut table = PeerTable::new("self", 8, 10);
        add_trusted_peer(&mut table, "a", 1);
        add_trusted_peer(&mut table, "b", 2);
        engine.update_peer_position(&mut table, "a", -50, 0);
        engine.update_peer_position(&mut table, "b", -70, 0);

        let pass = engine.tick(&mut table, 1_000);
        assert!(!pass.directions_assigned);
        assert_eq!(pass.entries.len(), 2);
        assert!(table.iter().all(|(_, p)| p.position.direction == Direction::Unknown));
    }

    #[test]
    fn test_directions_follow_distance_rank() {
        let mut engine = create_test_engine();
        let mut table = PeerTable::new("self", 8, 10);
        for (id, octet, rssi) in [("far", 1, -80), ("near", 2, -45), ("mid", 3, -60)] {
            add_trusted_peer(&mut table, id, octet);
            engine.update_peer_position(&mut table, id, rssi, 0);
        }

        let pass = engine.tick(&mut table, 1_000);
        assert!(pass.directions_assigned);
        let order: Vec<&str> = pass.entries.iter().map(|e| e.device_id.as_str()).collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
        assert_eq!(table.get_by_id("near").unwrap().position.direction, Direction::N);
        assert_eq!(table.get_by_id("mid").unwrap().position.direction, Direction::NE);
        assert_eq!(table.get_by_id("far").unwrap().position.direction, Direction::E);
    }

    #[test]
    fn test_untrusted_peers_are_not_ranked() {
        let mut engine = create_test_engine();
        let mut table = PeerTable::new("self", 8, 10);
        add_trusted_peer(&mut table, "a", 1);
        engine.update_peer_position(&mut table, "a", -50, 0);
        table.get_by_id_mut("a").unwrap().handshake_complete = false;

        let pass = engine.tick(&mut table, 1_000);
        assert!(pass.entries.is_empty());
    }

    #[test]
    fn test_stale_estimates_are_invalidated() {
        let mut engine = create_test_engine();
        let mut table = PeerTable::new("self", 8, 10);
        add_trusted_peer(&mut table, "a", 1);
        engine.update_peer_position(&mut table, "a", -50, 0);

        let pass = engine.tick(&mut table, 61_000);
        assert_eq!(pass.invalidated, 1);
        assert!(pass.entries.is_empty());
        assert!(!table.get_by_id("a").unwrap().position.valid);
    }

    #[test]
    fn test_sector_wraps_after_eight() {
        assert_eq!(Direction::for_rank(0), Direction::N);
        assert_eq!(Direction::for_rank(7), Direction::NW);
        assert_eq!(Direction::for_rank(8), Direction::N);
    }
}
