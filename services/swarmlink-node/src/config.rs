//! Host configuration for the node service
//!
//! The service reads a single TOML file: the node's provisioning sections
//! plus a `[host]` table describing how the broadcast medium is emulated on
//! this machine.

use serde::Deserialize;
use std::path::Path;
use swarmlink_core::NodeConfig;
use swarmlink_radio::RadioAddress;
use swarmlink_rf::Rssi;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// UDP port shared by every emulated radio on the segment
    pub udp_port: u16,
    /// Radio address; derived from the device id when absent
    pub address: Option<RadioAddress>,
    /// Signal strength reported for every received frame
    pub link_rssi: Rssi,
    /// Scheduler poll period
    pub tick_ms: u64,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            udp_port: 47_800,
            address: None,
            link_rssi: -60,
            tick_ms: 250,
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub node: NodeConfig,
    #[serde(default)]
    pub host: HostConfig,
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: ServiceConfig = toml::from_str(raw)?;
        config.node.validate()?;
        if config.host.tick_ms == 0 {
            anyhow::bail!("host.tick_ms must be greater than zero");
        }
        Ok(config)
    }

    /// Configured address, or a locally administered one derived from the device id
    pub fn radio_address(&self) -> RadioAddress {
        self.host
            .address
            .unwrap_or_else(|| derive_address(&self.node.identity.device_id))
    }
}

/// FNV-1a over the device id, folded into a unicast, locally administered address
fn derive_address(device_id: &str) -> RadioAddress {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in device_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    let bytes = hash.to_be_bytes();
    RadioAddress::new([0x02, bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
}
