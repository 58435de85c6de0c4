//! SwarmLink Radio - shared-radio control for the mesh node
//!
//! The broadcast transport and the infrastructure-network transport share one
//! physical radio and are never active at the same time. This crate owns
//! that constraint:
//!
//! - **Driver seam**: [`RadioDriver`] abstracts the hardware (or an emulation)
//! - **Controller**: [`RadioController`] serialises transport switches with a
//!   settle delay and refuses sends while the broadcast side is down
//! - **Mode selection**: [`ModeSelector`] derives the [`CommMode`] from link
//!   state, with a dwell time between transitions
//! - **Simulation**: [`SimAir`]/[`SimRadio`] provide an in-memory medium for
//!   tests and host runs

pub mod address;
pub mod error;
pub mod mode;
pub mod radio;
pub mod sim;

pub use address::RadioAddress;
pub use error::{RadioError, RadioResult};
pub use mode::{CommMode, LinkStatus, ModeSelector, ModeTransition};
pub use radio::{ActiveTransport, Destination, RadioController, RadioDriver, ReceivedFrame};
pub use sim::{SimAir, SimRadio};
