//! Store-and-forward relay store
//!
//! Status messages (this node's own and those heard from neighbours) are
//! kept until they reach the monitoring endpoint or expire. Delivery is
//! either direct, when this node can reach the endpoint, or by handing the
//! message to a trusted endpoint-capable peer as a relay request. The relay
//! chain carried with each message prevents loops.

use std::cmp::Reverse;
use std::collections::VecDeque;
use swarmlink_core::{DeviceId, Timestamp};

use crate::envelope::{Envelope, Outbound, Payload, RelayHop, RelayPayload};
use crate::peer::PeerTable;
use crate::uplink::{Uplink, UplinkRecord};

/// Limits for a [`RelayStore`]
#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    pub capacity: usize,
    pub ttl_ms: u64,
    pub max_hops: usize,
    /// Wait before the message is offered again, and before the same peer is asked again
    pub retry_cooldown_ms: u64,
    pub max_attempted_peers: usize,
    /// Relay requests sent per message before it waits for direct delivery or expiry
    pub max_relay_attempts: u32,
}

/// One peer asked (or known) to carry a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAttempt {
    pub peer: DeviceId,
    pub at: Timestamp,
}

/// Message held for delivery
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub envelope: Envelope,
    /// Local time the message was stored
    pub stored_at: Timestamp,
    pub last_attempt: Option<Timestamp>,
    pub delivered: bool,
    /// Nodes that have carried the message so far, oldest first
    pub chain: Vec<RelayHop>,
    /// Peers already asked to carry it, with the time of the latest request
    pub attempted: VecDeque<RelayAttempt>,
    /// Relay requests sent so far
    pub relay_attempts: u32,
    pub is_own: bool,
    order: u64,
}

impl StoredMessage {
    pub fn msg_id(&self) -> u32 {
        self.envelope.msg_id
    }

    pub fn origin(&self) -> &str {
        &self.envelope.source.device_id
    }

    pub fn hop_count(&self) -> usize {
        self.chain.len()
    }

    pub fn in_chain(&self, device_id: &str) -> bool {
        self.chain.iter().any(|h| h.device_id == device_id)
    }

    pub fn last_attempt_to(&self, device_id: &str) -> Option<Timestamp> {
        self.attempted.iter().find(|a| a.peer == device_id).map(|a| a.at)
    }

    /// A peer may carry the message unless it originated it or already
    /// carried it. A peer already asked becomes eligible again once
    /// `retry_cooldown_ms` has passed since it was last asked.
    pub fn can_relay_to_peer(&self, device_id: &str, now: Timestamp, retry_cooldown_ms: u64) -> bool {
        if device_id == self.origin() || self.in_chain(device_id) {
            return false;
        }
        self.last_attempt_to(device_id)
            .map_or(true, |at| now.saturating_sub(at) >= retry_cooldown_ms)
    }

    fn record_attempt(&mut self, peer: &str, now: Timestamp, max: usize) {
        if let Some(existing) = self.attempted.iter_mut().find(|a| a.peer == peer) {
            existing.at = now;
            return;
        }
        if self.attempted.len() >= max {
            self.attempted.pop_front();
        }
        self.attempted.push_back(RelayAttempt {
            peer: peer.to_string(),
            at: now,
        });
    }

    fn is_expired(&self, ttl_ms: u64, now: Timestamp) -> bool {
        now.saturating_sub(self.stored_at) > ttl_ms
    }
}

/// Result of [`RelayStore::store`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// Same (origin, msg id) already held or recently delivered
    Duplicate,
    /// Stored after dropping the oldest undelivered message
    StoredWithEviction { evicted_origin: DeviceId, evicted_msg_id: u32 },
}

/// Bounded store of messages awaiting delivery
#[derive(Debug)]
pub struct RelayStore {
    own_device_id: DeviceId,
    own_owner: String,
    limits: RelayLimits,
    slots: Vec<Option<StoredMessage>>,
    /// Recently delivered keys, so late copies are not stored again
    delivered: VecDeque<(DeviceId, u32)>,
    next_order: u64,
}

impl RelayStore {
    pub fn new(own_device_id: impl Into<DeviceId>, own_owner: impl Into<String>, limits: RelayLimits) -> Self {
        Self {
            own_device_id: own_device_id.into(),
            own_owner: own_owner.into(),
            slots: vec![None; limits.capacity],
            delivered: VecDeque::with_capacity(limits.capacity * 2),
            limits,
            next_order: 0,
        }
    }

    pub fn limits(&self) -> &RelayLimits {
        &self.limits
    }

    fn position(&self, origin: &str, msg_id: u32) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|m| m.msg_id() == msg_id && m.origin() == origin)
        })
    }

    pub fn contains(&self, origin: &str, msg_id: u32) -> bool {
        self.position(origin, msg_id).is_some()
    }

    pub fn get(&self, origin: &str, msg_id: u32) -> Option<&StoredMessage> {
        self.position(origin, msg_id).and_then(|i| self.slots[i].as_ref())
    }

    /// Hold a message for delivery.
    ///
    /// Deduplicates on (origin, msg id). When full, the oldest undelivered
    /// message makes room.
    pub fn store(&mut self, envelope: Envelope, chain: Vec<RelayHop>, is_own: bool, now: Timestamp) -> StoreOutcome {
        let origin = envelope.source.device_id.clone();
        let msg_id = envelope.msg_id;
        if self.contains(&origin, msg_id) || self.delivered.iter().any(|(o, i)| *o == origin && *i == msg_id) {
            tracing::debug!(origin = %origin, msg_id, "Duplicate message not stored");
            return StoreOutcome::Duplicate;
        }

        let mut dedup_chain: Vec<RelayHop> = Vec::with_capacity(chain.len());
        for hop in chain {
            if !dedup_chain.iter().any(|h| h.device_id == hop.device_id) {
                dedup_chain.push(hop);
            }
        }

        let mut outcome = StoreOutcome::Stored;
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                let victim = self
                    .oldest(|m| !m.delivered)
                    .or_else(|| self.oldest(|_| true))
                    .unwrap_or(0);
                if let Some(evicted) = self.slots[victim].take() {
                    tracing::warn!(
                        origin = %evicted.origin(),
                        msg_id = evicted.msg_id(),
                        "Relay store full, evicting oldest message"
                    );
                    outcome = StoreOutcome::StoredWithEviction {
                        evicted_origin: evicted.origin().to_string(),
                        evicted_msg_id: evicted.msg_id(),
                    };
                }
                victim
            }
        };

        tracing::debug!(origin = %origin, msg_id, hops = dedup_chain.len(), is_own, "Message stored");
        self.slots[slot] = Some(StoredMessage {
            envelope,
            stored_at: now,
            last_attempt: None,
            delivered: false,
            chain: dedup_chain,
            attempted: VecDeque::new(),
            relay_attempts: 0,
            is_own,
            order: self.next_order,
        });
        self.next_order += 1;
        outcome
    }

    fn oldest(&self, filter: impl Fn(&StoredMessage) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|m| filter(*m)).map(|m| (i, m.order)))
            .min_by_key(|(_, order)| *order)
            .map(|(i, _)| i)
    }

    /// Record that `peer` was asked (or is known) to carry a message at `now`.
    pub fn mark_attempted(&mut self, origin: &str, msg_id: u32, peer: &str, now: Timestamp) {
        let max = self.limits.max_attempted_peers;
        let Some(index) = self.position(origin, msg_id) else {
            return;
        };
        if let Some(msg) = self.slots[index].as_mut() {
            msg.record_attempt(peer, now, max);
        }
    }

    /// Build relay requests for undelivered messages that have a trusted,
    /// endpoint-capable peer outside their chain.
    ///
    /// Peers never asked come first, then the one asked longest ago, then
    /// the strongest signal. A peer is asked again only after the retry
    /// cooldown, and each message gets at most `max_relay_attempts`
    /// requests. This node is appended to the chain before the message
    /// leaves.
    pub fn check_relay_opportunities(&mut self, peers: &PeerTable, now: Timestamp) -> Vec<Outbound> {
        let mut requests = Vec::new();
        let own_id = self.own_device_id.clone();
        let own_owner = self.own_owner.clone();
        let limits = self.limits;

        for msg in self.slots.iter_mut().flatten() {
            if msg.delivered || msg.is_expired(limits.ttl_ms, now) {
                continue;
            }
            if let Some(last) = msg.last_attempt {
                if now.saturating_sub(last) < limits.retry_cooldown_ms {
                    continue;
                }
            }
            if msg.relay_attempts >= limits.max_relay_attempts {
                continue;
            }
            let carried_here = msg.in_chain(&own_id);
            if !carried_here && msg.hop_count() >= limits.max_hops {
                tracing::debug!(origin = %msg.origin(), msg_id = msg.msg_id(), "Hop limit reached");
                continue;
            }

            let candidate = peers
                .trusted()
                .filter(|p| p.offers_endpoint() && msg.can_relay_to_peer(&p.device_id, now, limits.retry_cooldown_ms))
                .max_by_key(|p| {
                    let asked = msg.last_attempt_to(&p.device_id);
                    (asked.is_none(), Reverse(asked), p.last_rssi)
                });
            let Some(peer) = candidate else {
                continue;
            };

            if !carried_here {
                msg.chain.push(RelayHop {
                    device_id: own_id.clone(),
                    owner: own_owner.clone(),
                    timestamp: now,
                    rssi: peer.last_rssi,
                });
            }
            let retry = msg.last_attempt_to(&peer.device_id).is_some();
            msg.record_attempt(&peer.device_id, now, limits.max_attempted_peers);
            msg.relay_attempts += 1;
            msg.last_attempt = Some(now);

            tracing::info!(
                origin = %msg.origin(),
                msg_id = msg.msg_id(),
                via = %peer.device_id,
                hops = msg.hop_count(),
                attempt = msg.relay_attempts,
                retry,
                "Relaying message"
            );
            requests.push(Outbound::unicast(
                peer.address,
                Payload::Relay(RelayPayload {
                    original: Box::new(msg.envelope.clone()),
                    chain: msg.chain.clone(),
                }),
            ));
        }
        requests
    }

    /// Publish every undelivered message to the endpoint uplink.
    ///
    /// Delivered messages are evicted. Stops at the first uplink error and
    /// leaves the rest for the next attempt. Returns how many were delivered.
    pub fn attempt_direct_delivery(&mut self, endpoint_reachable: bool, uplink: &mut dyn Uplink, now: Timestamp) -> usize {
        if !endpoint_reachable {
            return 0;
        }

        let mut delivered = 0;
        for slot in self.slots.iter_mut() {
            let Some(msg) = slot.as_mut() else {
                continue;
            };
            if msg.delivered {
                continue;
            }

            let record = UplinkRecord::Delivered {
                via: self.own_device_id.clone(),
                hop_count: msg.hop_count(),
                chain: msg.chain.clone(),
                delivered_at: now,
                envelope: msg.envelope.clone(),
            };
            if let Err(e) = uplink.publish(&record) {
                tracing::warn!(error = %e, "Endpoint delivery failed, keeping messages");
                break;
            }
            msg.delivered = true;
            msg.last_attempt = Some(now);
            delivered += 1;
        }

        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|m| m.delivered) {
                if let Some(msg) = slot.take() {
                    if self.delivered.len() >= self.limits.capacity * 2 {
                        self.delivered.pop_front();
                    }
                    self.delivered.push_back((msg.origin().to_string(), msg.msg_id()));
                }
            }
        }

        if delivered > 0 {
            tracing::info!(delivered, "Delivered stored messages to endpoint");
        }
        delivered
    }

    /// Drop messages past the TTL, delivered or not.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let ttl = self.limits.ttl_ms;
        let mut expired = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|m| m.is_expired(ttl, now)) {
                if let Some(msg) = slot.take() {
                    tracing::debug!(origin = %msg.origin(), msg_id = msg.msg_id(), "Message expired");
                    expired += 1;
                }
            }
        }
        expired
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredMessage> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn undelivered_count(&self) -> usize {
        self.iter().filter(|m| !m.delivered).count()
    }
}
