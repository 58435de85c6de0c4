//! Configuration management for SwarmLink.
//!
//! Everything here is provisioning-time configuration: it is read once at boot
//! and never mutated while the node runs.

use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;

use crate::error::{CoreError, Result};

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub security: SecurityConfig,
    pub radio: RadioConfig,
    pub infra: InfraConfig,
    pub calibration: CalibrationConfig,
    pub timing: TimingConfig,
    pub capacity: CapacityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub device_id: String,
    pub owner: String,
    pub device_type: String,
    pub firmware: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared pre-key token carried in every envelope
    pub shared_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Broadcast channel (1-14)
    pub channel: u8,
    /// Minimum delay between tearing one transport down and bringing the other up
    pub settle_ms: u64,
    /// Hard ceiling for an encoded broadcast frame
    pub max_frame_bytes: usize,
    /// Depth of the receive hand-off queue
    pub rx_queue_depth: usize,
}

/// Credentials for one infrastructure network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraNetwork {
    pub ssid: String,
    pub password: String,
}

/// How eagerly the node uses the infra link once it is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePreference {
    /// Keep broadcast primary; infra is a backup path
    #[default]
    Mesh,
    /// Prefer the endpoint link but keep the mesh running
    EndpointPrimary,
    /// Use only the endpoint link when it is reachable
    EndpointOnly,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InfraConfig {
    pub networks: Vec<InfraNetwork>,
    /// Monitoring endpoint address (host:port)
    pub endpoint: Option<String>,
    pub preference: ModePreference,
}

/// Log-distance path-loss calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// RSSI measured at the reference distance (dBm)
    pub ref_rssi: f64,
    /// Reference distance (meters)
    pub ref_distance_m: f64,
    /// Path-loss exponent `n`
    pub path_loss_exponent: f64,
    pub min_distance_m: f64,
    pub max_distance_m: f64,
}

/// Intervals, timeouts and cooldowns, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub discovery_interval_ms: u64,
    pub positioning_interval_ms: u64,
    pub relay_check_interval_ms: u64,
    pub prune_interval_ms: u64,
    pub expire_interval_ms: u64,
    pub mode_check_interval_ms: u64,
    pub status_interval_ms: u64,
    pub peer_stale_ms: u64,
    pub handshake_cooldown_ms: u64,
    pub mode_dwell_ms: u64,
    pub message_ttl_ms: u64,
    pub relay_retry_cooldown_ms: u64,
    /// Bounded wait for the shared counter lock
    pub counter_lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub max_peers: usize,
    pub signal_window: usize,
    pub max_stored_messages: usize,
    pub max_hops: usize,
    pub max_attempted_peers: usize,
    /// Relay requests per stored message
    pub max_relay_attempts: u32,
    pub max_handshake_attempts: u8,
    /// Minimum trusted peers before directions are assigned
    pub min_peers_for_direction: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_id: "node-001".to_string(),
            owner: "unassigned".to_string(),
            device_type: "mesh".to_string(),
            firmware: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            shared_key: "swarmlink-prekey".to_string(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            settle_ms: 100,
            max_frame_bytes: 1470,
            rx_queue_depth: 32,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            ref_rssi: -40.0,
            ref_distance_m: 1.0,
            path_loss_exponent: 2.0,
            min_distance_m: 0.1,
            max_distance_m: 100.0,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: 10_000,
            positioning_interval_ms: 5_000,
            relay_check_interval_ms: 15_000,
            prune_interval_ms: 30_000,
            expire_interval_ms: 30_000,
            mode_check_interval_ms: 10_000,
            status_interval_ms: 60_000,
            peer_stale_ms: 120_000,
            handshake_cooldown_ms: 30_000,
            mode_dwell_ms: 30_000,
            message_ttl_ms: 600_000,
            relay_retry_cooldown_ms: 20_000,
            counter_lock_timeout_ms: 10,
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_peers: 20,
            signal_window: 10,
            max_stored_messages: 20,
            max_hops: 5,
            max_attempted_peers: 8,
            max_relay_attempts: 3,
            max_handshake_attempts: 3,
            min_peers_for_direction: 3,
        }
    }
}

impl NodeConfig {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the node cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.identity.device_id.trim().is_empty() {
            return Err(CoreError::Config("identity.device_id must not be empty".into()));
        }
        if self.security.shared_key.is_empty() {
            return Err(CoreError::Config("security.shared_key must not be empty".into()));
        }
        if !(1..=14).contains(&self.radio.channel) {
            return Err(CoreError::Config(format!(
                "radio.channel {} outside 1..=14",
                self.radio.channel
            )));
        }
        if self.radio.max_frame_bytes == 0 || self.radio.rx_queue_depth == 0 {
            return Err(CoreError::Config(
                "radio.max_frame_bytes and radio.rx_queue_depth must be non-zero".into(),
            ));
        }
        let cal = &self.calibration;
        let values = [
            cal.ref_rssi,
            cal.ref_distance_m,
            cal.path_loss_exponent,
            cal.min_distance_m,
            cal.max_distance_m,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Config("calibration values must be finite".into()));
        }
        if cal.path_loss_exponent <= 0.0 || cal.ref_distance_m <= 0.0 {
            return Err(CoreError::Config(
                "calibration.path_loss_exponent and ref_distance_m must be positive".into(),
            ));
        }
        if !(cal.min_distance_m <= cal.max_distance_m) {
            return Err(CoreError::Config(
                "calibration.min_distance_m exceeds max_distance_m".into(),
            ));
        }
        let cap = &self.capacity;
        if cap.max_peers == 0
            || cap.signal_window == 0
            || cap.max_stored_messages == 0
            || cap.max_attempted_peers == 0
            || cap.max_relay_attempts == 0
        {
            return Err(CoreError::Config("capacity values must be non-zero".into()));
        }
        Ok(())
    }

    /// Whether the node has anything to bring the infra transport up with
    pub fn has_infra(&self) -> bool {
        !self.infra.networks.is_empty() && self.infra.endpoint.is_some()
    }
}
