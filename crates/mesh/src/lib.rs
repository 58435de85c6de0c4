//! SwarmLink Mesh - store-and-forward mesh over a shared broadcast radio
//!
//! Nodes discover each other with authenticated pings, estimate their
//! neighbours' distance from signal strength, and carry status messages
//! toward whichever node can reach the monitoring endpoint.
//!
//! # Core Components
//!
//! - **Envelope codec**: compact and verbose wire schemas, shared-key validation
//! - **Peer table**: fixed-capacity neighbour arena with signal history
//! - **Discovery**: trust on validated ping, handshake with per-peer cooldown
//! - **Positioning**: path-loss distance, confidence and coarse sectors
//! - **Relay store**: bounded store-and-forward with loop-free relay chains
//! - **Node**: the receive path and periodic scheduler tying it all together
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swarmlink_core::{NodeConfig, SystemClock};
//! use swarmlink_mesh::MeshNode;
//! use swarmlink_radio::{RadioAddress, SimAir};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let air = SimAir::new();
//! let radio = air.radio(RadioAddress::new([2, 0, 0, 0, 0, 1]));
//! let mut node = MeshNode::new(NodeConfig::default(), radio, Arc::new(SystemClock))?;
//! node.start()?;
//!
//! node.tick();
//! for frame in air.drain(node.address()) {
//!     node.handle_frame(&frame);
//! }
//! println!("{} peers", node.status().peers);
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod envelope;
pub mod error;
pub mod node;
pub mod peer;
pub mod positioning;
pub mod relay;
pub mod rx_queue;
pub mod scheduler;
pub mod stats;
pub mod uplink;

// Re-export main types
pub use discovery::{DiscoveryEngine, LocalAdvert};
pub use envelope::{
    Capabilities, DecodeError, DistanceEntry, DistancePayload, EncodeError, Envelope, EnvelopeCodec,
    HandshakePayload, MessageKind, Outbound, Payload, PositioningPayload, RelayHop, RelayPayload,
    SourceDescriptor, StatusReport, PROTOCOL_VERSION,
};
pub use error::{MeshError, MeshResult};
pub use node::{Disposition, DropReason, MeshNode, NodeStatus};
pub use peer::{PeerRecord, PeerSlot, PeerTable, UpsertOutcome};
pub use positioning::{Direction, PositioningEngine, PositioningPass, RelativePosition};
pub use relay::{RelayAttempt, RelayLimits, RelayStore, StoreOutcome, StoredMessage};
pub use rx_queue::{rx_channel, RxReceiver, RxSender};
pub use scheduler::{IntervalTimer, Scheduler, Task};
pub use stats::{MessageTally, NodeCounters, SharedCounters};
pub use uplink::{LineUplink, MemoryUplink, RelayDirection, Uplink, UplinkRecord};
