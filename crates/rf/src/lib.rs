//! SwarmLink RF - signal-strength math for relative positioning.

pub mod signal;

pub use signal::{PathLossModel, Rssi, SignalWindow};
