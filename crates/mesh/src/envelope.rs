//! Envelope codec
//!
//! Every frame on the broadcast transport is one JSON envelope. Two schemas
//! exist in the field: the compact single-letter form (canonical, always
//! emitted) and the verbose form older firmware sends. Both decode to the
//! same [`Envelope`]. Message kinds likewise arrive either as numeric codes
//! or as names.
//!
//! Decoding is a pure transform. Authentication is a separate
//! [`EnvelopeCodec::validate`] step; callers drop anything it rejects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use swarmlink_core::Timestamp;
use swarmlink_radio::{CommMode, Destination, RadioAddress};
use swarmlink_rf::Rssi;
use thiserror::Error;

use crate::positioning::Direction;

/// Wire protocol version emitted by this firmware
pub const PROTOCOL_VERSION: &str = "2.0";

/// Message kinds carried in an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    Data,
    Handshake,
    Positioning,
    Relay,
    Distance,
}

impl MessageKind {
    /// Numeric code used by the compact schema
    pub fn code(&self) -> u8 {
        match self {
            MessageKind::Ping => 1,
            MessageKind::Data => 2,
            MessageKind::Handshake => 3,
            MessageKind::Positioning => 4,
            MessageKind::Relay => 5,
            MessageKind::Distance => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageKind::Ping),
            2 => Some(MessageKind::Data),
            3 => Some(MessageKind::Handshake),
            4 => Some(MessageKind::Positioning),
            5 => Some(MessageKind::Relay),
            6 => Some(MessageKind::Distance),
            _ => None,
        }
    }

    /// Name used by the verbose schema
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Ping => "ping",
            MessageKind::Data => "data",
            MessageKind::Handshake => "handshake",
            MessageKind::Positioning => "positioning",
            MessageKind::Relay => "relay",
            MessageKind::Distance => "distance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ping" => Some(MessageKind::Ping),
            "data" => Some(MessageKind::Data),
            "handshake" => Some(MessageKind::Handshake),
            "positioning" | "position" => Some(MessageKind::Positioning),
            "relay" => Some(MessageKind::Relay),
            "distance" => Some(MessageKind::Distance),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared capability bits of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Node can currently reach the monitoring endpoint
    pub const ENDPOINT: Capabilities = Capabilities(0b0001);
    /// Node has an infra link
    pub const INFRA: Capabilities = Capabilities(0b0010);
    /// Node stores and forwards for others
    pub const RELAY: Capabilities = Capabilities(0b0100);
    /// Node answers positioning pings
    pub const POSITIONING: Capabilities = Capabilities(0b1000);

    pub const fn empty() -> Self {
        Capabilities(0)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Capabilities(bits)
    }

    pub fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Capabilities) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

/// Who sent an envelope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDescriptor {
    #[serde(rename = "d", alias = "device_id")]
    pub device_id: String,
    #[serde(rename = "o", alias = "owner")]
    pub owner: String,
    #[serde(rename = "a", alias = "mac", alias = "address")]
    pub address: RadioAddress,
    #[serde(rename = "t", alias = "device_type")]
    pub device_type: String,
    #[serde(rename = "f", alias = "firmware", alias = "fw")]
    pub firmware: String,
}

/// Node status carried by `ping` and `data` envelopes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    #[serde(rename = "q", alias = "seq")]
    pub seq: u32,
    #[serde(rename = "h", alias = "free_heap")]
    pub free_heap: u32,
    #[serde(rename = "u", alias = "uptime")]
    pub uptime_s: u64,
    #[serde(rename = "md", alias = "mode")]
    pub mode: CommMode,
    #[serde(rename = "n", alias = "peers", alias = "peer_count")]
    pub peer_count: u8,
    #[serde(rename = "c", alias = "capabilities")]
    pub caps: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakePayload {
    /// Inbound message id this answers; `None` for a handshake request
    #[serde(rename = "r", alias = "reply_to", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u32>,
    #[serde(rename = "ok", alias = "accepted")]
    pub ok: bool,
    #[serde(rename = "c", alias = "capabilities")]
    pub caps: Capabilities,
    #[serde(rename = "md", alias = "mode")]
    pub mode: CommMode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositioningPayload {
    #[serde(rename = "q", alias = "seq")]
    pub seq: u32,
    #[serde(rename = "tx", alias = "tx_power")]
    pub tx_power: i8,
}

/// One forwarding step of a stored message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayHop {
    #[serde(rename = "d", alias = "device_id")]
    pub device_id: String,
    #[serde(rename = "o", alias = "owner")]
    pub owner: String,
    #[serde(rename = "ts", alias = "timestamp")]
    pub timestamp: Timestamp,
    #[serde(rename = "r", alias = "rssi")]
    pub rssi: Rssi,
}

/// Relay request: the full original envelope plus the chain so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPayload {
    #[serde(rename = "e", alias = "original", alias = "envelope")]
    pub original: Box<Envelope>,
    #[serde(rename = "ch", alias = "chain", alias = "relay_chain", default)]
    pub chain: Vec<RelayHop>,
}

impl RelayPayload {
    pub fn hop_count(&self) -> usize {
        self.chain.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceEntry {
    #[serde(rename = "d", alias = "device_id")]
    pub device_id: String,
    #[serde(rename = "m", alias = "distance")]
    pub distance_m: f32,
    #[serde(rename = "dir", alias = "direction", default)]
    pub direction: Direction,
    #[serde(rename = "c", alias = "confidence", default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DistancePayload {
    #[serde(rename = "e", alias = "entries")]
    pub entries: Vec<DistanceEntry>,
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ping(StatusReport),
    Data(StatusReport),
    Handshake(HandshakePayload),
    Positioning(PositioningPayload),
    Relay(RelayPayload),
    Distance(DistancePayload),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Ping(_) => MessageKind::Ping,
            Payload::Data(_) => MessageKind::Data,
            Payload::Handshake(_) => MessageKind::Handshake,
            Payload::Positioning(_) => MessageKind::Positioning,
            Payload::Relay(_) => MessageKind::Relay,
            Payload::Distance(_) => MessageKind::Distance,
        }
    }

    fn to_value(&self) -> Value {
        let value = match self {
            Payload::Ping(p) | Payload::Data(p) => serde_json::to_value(p),
            Payload::Handshake(p) => serde_json::to_value(p),
            Payload::Positioning(p) => serde_json::to_value(p),
            Payload::Relay(p) => serde_json::to_value(p),
            Payload::Distance(p) => serde_json::to_value(p),
        };
        value.unwrap_or(Value::Null)
    }

    fn from_value(kind: MessageKind, value: Value) -> Result<Self, serde_json::Error> {
        // Older firmware omits empty payloads entirely
        let value = match value {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        Ok(match kind {
            MessageKind::Ping => Payload::Ping(serde_json::from_value(value)?),
            MessageKind::Data => Payload::Data(serde_json::from_value(value)?),
            MessageKind::Handshake => Payload::Handshake(serde_json::from_value(value)?),
            MessageKind::Positioning => Payload::Positioning(serde_json::from_value(value)?),
            MessageKind::Relay => Payload::Relay(serde_json::from_value(value)?),
            MessageKind::Distance => Payload::Distance(serde_json::from_value(value)?),
        })
    }
}

/// Authenticated message unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct Envelope {
    pub version: String,
    /// Unique per sender
    pub msg_id: u32,
    /// Creation time on the sender's clock
    pub timestamp: Timestamp,
    /// Shared pre-key token
    pub key: String,
    pub source: SourceDescriptor,
    pub payload: Payload,
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn device_id(&self) -> &str {
        &self.source.device_id
    }
}

/// Kind as it appears on the wire: a code or a name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum KindField {
    Code(u8),
    Name(String),
}

impl KindField {
    fn resolve(&self) -> Option<MessageKind> {
        match self {
            KindField::Code(code) => MessageKind::from_code(*code),
            KindField::Name(name) => MessageKind::from_name(name),
        }
    }
}

/// Wire layout shared by both schemas
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "v", alias = "version", default)]
    version: String,
    #[serde(rename = "i", alias = "msg_id", alias = "id", alias = "message_id", default)]
    msg_id: u32,
    #[serde(rename = "ts", alias = "timestamp", alias = "time", default)]
    timestamp: Timestamp,
    #[serde(rename = "k", alias = "key", alias = "pre_key", alias = "psk", default)]
    key: String,
    #[serde(rename = "s", alias = "source", alias = "src", default)]
    source: SourceDescriptor,
    #[serde(rename = "m", alias = "type", alias = "kind", alias = "msg_type", default)]
    kind: Option<KindField>,
    #[serde(rename = "p", alias = "payload", alias = "data", default)]
    payload: Value,
}

impl From<Envelope> for WireEnvelope {
    fn from(env: Envelope) -> Self {
        WireEnvelope {
            version: env.version,
            msg_id: env.msg_id,
            timestamp: env.timestamp,
            key: env.key,
            source: env.source,
            kind: Some(KindField::Code(env.payload.kind().code())),
            payload: env.payload.to_value(),
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = DecodeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let kind_field = wire.kind.ok_or(DecodeError::MissingKind)?;
        let kind = kind_field.resolve().ok_or_else(|| {
            DecodeError::UnknownKind(match &kind_field {
                KindField::Code(code) => code.to_string(),
                KindField::Name(name) => name.clone(),
            })
        })?;
        let payload = Payload::from_value(kind, wire.payload).map_err(|e| DecodeError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })?;

        Ok(Envelope {
            version: wire.version,
            msg_id: wire.msg_id,
            timestamp: wire.timestamp,
            key: wire.key,
            source: wire.source,
            payload,
        })
    }
}

/// Frame could not be turned into an envelope
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty frame")]
    Empty,

    #[error("Frame of {len} bytes exceeds the {max} byte ceiling")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Envelope carries no message kind")]
    MissingKind,

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: MessageKind, reason: String },
}

/// Envelope could not be turned into a frame
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Encoded {kind} envelope is {len} bytes, ceiling is {max}")]
    FrameTooLarge {
        kind: MessageKind,
        len: usize,
        max: usize,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Message waiting to be sealed and sent
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub dest: Destination,
    pub payload: Payload,
}

impl Outbound {
    pub fn broadcast(payload: Payload) -> Self {
        Self {
            dest: Destination::Broadcast,
            payload,
        }
    }

    pub fn unicast(to: RadioAddress, payload: Payload) -> Self {
        Self {
            dest: Destination::Unicast(to),
            payload,
        }
    }
}

/// Seals, encodes, decodes and validates envelopes for one node
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    source: SourceDescriptor,
    shared_key: String,
    next_msg_id: u32,
    max_frame: usize,
}

impl EnvelopeCodec {
    /// Create a codec; message ids start at a random value so they do not
    /// repeat across reboots.
    pub fn new(source: SourceDescriptor, shared_key: impl Into<String>, max_frame: usize) -> Self {
        Self {
            source,
            shared_key: shared_key.into(),
            next_msg_id: rand::random(),
            max_frame,
        }
    }

    /// Pin the first message id
    pub fn with_first_msg_id(mut self, msg_id: u32) -> Self {
        self.next_msg_id = msg_id;
        self
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn device_id(&self) -> &str {
        &self.source.device_id
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Wrap a payload in an envelope with a fresh message id.
    pub fn seal(&mut self, payload: Payload, now: Timestamp) -> Envelope {
        let msg_id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);
        Envelope {
            version: PROTOCOL_VERSION.to_string(),
            msg_id,
            timestamp: now,
            key: self.shared_key.clone(),
            source: self.source.clone(),
            payload,
        }
    }

    /// Encode in the canonical compact schema, enforcing the frame ceiling.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
        let bytes = serde_json::to_vec(envelope)?;
        if bytes.len() > self.max_frame {
            return Err(EncodeError::FrameTooLarge {
                kind: envelope.kind(),
                len: bytes.len(),
                max: self.max_frame,
            });
        }
        Ok(bytes)
    }

    /// Decode a frame in either schema. Does not authenticate.
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        if bytes.len() > self.max_frame {
            return Err(DecodeError::FrameTooLarge {
                len: bytes.len(),
                max: self.max_frame,
            });
        }
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;
        Envelope::try_from(wire)
    }

    /// Structural and shared-key check. Logs the reason and returns false on
    /// rejection; callers must discard the envelope.
    pub fn validate(&self, envelope: &Envelope) -> bool {
        if envelope.version.is_empty() || envelope.source.device_id.is_empty() {
            tracing::debug!(msg_id = envelope.msg_id, "Envelope missing version or source id");
            return false;
        }
        if envelope.key.is_empty() {
            tracing::warn!(device_id = %envelope.source.device_id, "Envelope without key token");
            return false;
        }
        if envelope.key != self.shared_key {
            tracing::warn!(
                device_id = %envelope.source.device_id,
                msg_id = envelope.msg_id,
                "Shared key mismatch"
            );
            return false;
        }
        true
    }

    /// Whether the envelope claims to come from this node
    pub fn is_own(&self, envelope: &Envelope) -> bool {
        envelope.source.device_id == self.source.device_id
    }
}
