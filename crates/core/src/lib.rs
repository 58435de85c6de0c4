//! Core functionality for the SwarmLink mesh node firmware.
//!
//! This crate provides the configuration surface, the shared error type,
//! logging initialisation and the clock abstraction used across the
//! SwarmLink crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    CalibrationConfig, CapacityConfig, IdentityConfig, InfraConfig, InfraNetwork, ModePreference,
    NodeConfig, RadioConfig, SecurityConfig, TimingConfig,
};
pub use error::{CoreError, Result};
pub use types::{current_timestamp, Clock, DeviceId, ManualClock, SystemClock, Timestamp};
