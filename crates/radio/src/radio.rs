//! Shared-radio controller
//!
//! One physical radio carries both the connectionless broadcast transport
//! and the infra-network transport. Switching tears the active side down,
//! waits out the settle delay, then brings the other side up.

use std::thread;
use std::time::{Duration, Instant};
use swarmlink_core::InfraNetwork;
use swarmlink_rf::Rssi;

use crate::address::RadioAddress;
use crate::error::{RadioError, RadioResult};
use crate::mode::LinkStatus;

/// Where an outbound broadcast-transport frame goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Every listening radio in range
    Broadcast,
    /// One peer, point-to-point
    Unicast(RadioAddress),
}

/// Frame as handed over by the receive callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Sender's radio address
    pub from: RadioAddress,
    /// Signal strength of this frame
    pub rssi: Rssi,
    /// Raw frame bytes
    pub data: Vec<u8>,
}

/// Hardware (or emulation) behind the controller
pub trait RadioDriver: Send {
    /// This radio's own address
    fn address(&self) -> RadioAddress;

    /// Bring the broadcast transport up on `channel`
    fn start_broadcast(&mut self, channel: u8) -> RadioResult<()>;

    fn stop_broadcast(&mut self) -> RadioResult<()>;

    /// Associate with the first reachable network; `Ok(false)` when none answered
    fn connect_infra(&mut self, networks: &[InfraNetwork]) -> RadioResult<bool>;

    fn disconnect_infra(&mut self) -> RadioResult<()>;

    /// Whether the monitoring endpoint answers over the current infra link
    fn probe_endpoint(&mut self) -> bool;

    /// Transmit one frame on the broadcast transport
    fn send_frame(&mut self, dest: Destination, frame: &[u8]) -> RadioResult<()>;
}

/// Which transport currently owns the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveTransport {
    None,
    Broadcast,
    Infra,
}

/// Serialises transport switches on the shared radio
#[derive(Debug)]
pub struct RadioController<D> {
    driver: D,
    channel: u8,
    networks: Vec<InfraNetwork>,
    settle: Duration,
    active: ActiveTransport,
    last_switch: Option<Instant>,
    link: LinkStatus,
}

impl<D: RadioDriver> RadioController<D> {
    pub fn new(driver: D, channel: u8, networks: Vec<InfraNetwork>, settle: Duration) -> Self {
        Self {
            driver,
            channel,
            networks,
            settle,
            active: ActiveTransport::None,
            last_switch: None,
            link: LinkStatus::default(),
        }
    }

    pub fn address(&self) -> RadioAddress {
        self.driver.address()
    }

    pub fn active(&self) -> ActiveTransport {
        self.active
    }

    /// Link state observed by the most recent infra bring-up
    pub fn link_status(&self) -> LinkStatus {
        self.link
    }

    pub fn has_infra_networks(&self) -> bool {
        !self.networks.is_empty()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Block until the settle delay since the previous switch has elapsed.
    fn wait_settle(&self) {
        if let Some(last) = self.last_switch {
            let elapsed = last.elapsed();
            if elapsed < self.settle {
                thread::sleep(self.settle - elapsed);
            }
        }
    }

    /// Tear down infra (if up) and bring the broadcast transport up.
    pub fn enable_broadcast_mode(&mut self) -> RadioResult<()> {
        if self.active == ActiveTransport::Broadcast {
            return Ok(());
        }

        if self.active == ActiveTransport::Infra {
            if let Err(e) = self.driver.disconnect_infra() {
                tracing::warn!(error = %e, "Infra teardown failed, continuing switch");
            }
            self.active = ActiveTransport::None;
        }

        self.wait_settle();
        self.last_switch = Some(Instant::now());
        self.driver.start_broadcast(self.channel)?;
        self.active = ActiveTransport::Broadcast;
        tracing::debug!(channel = self.channel, "Broadcast transport active");
        Ok(())
    }

    /// Tear down broadcast (if up) and associate with a known infra network.
    ///
    /// Returns whether association succeeded; the radio is left in infra
    /// mode either way so the caller decides when to go back.
    pub fn enable_infra_mode(&mut self) -> RadioResult<bool> {
        if self.networks.is_empty() {
            return Err(RadioError::NoInfraNetworks);
        }
        if self.active == ActiveTransport::Infra {
            return Ok(self.link.infra_connected);
        }

        if self.active == ActiveTransport::Broadcast {
            self.driver
                .stop_broadcast()
                .map_err(|e| RadioError::Switch(e.to_string()))?;
            self.active = ActiveTransport::None;
        }

        self.wait_settle();
        self.last_switch = Some(Instant::now());
        let connected = self.driver.connect_infra(&self.networks)?;
        self.active = ActiveTransport::Infra;

        self.probe_link(connected);
        tracing::debug!(
            connected,
            endpoint_reachable = self.link.endpoint_reachable,
            "Infra transport active"
        );
        Ok(connected)
    }

    fn probe_link(&mut self, connected: bool) {
        self.link = LinkStatus {
            infra_connected: connected,
            endpoint_reachable: connected && self.driver.probe_endpoint(),
        };
    }

    /// Re-associate and recheck the endpoint without leaving infra mode.
    fn refresh_infra(&mut self) -> RadioResult<LinkStatus> {
        let connected = match self.driver.connect_infra(&self.networks) {
            Ok(connected) => connected,
            Err(e) => {
                self.link = LinkStatus::default();
                return Err(e);
            }
        };
        let previous = self.link;
        self.probe_link(connected);
        if self.link != previous {
            tracing::info!(
                connected,
                endpoint_reachable = self.link.endpoint_reachable,
                "Infra link changed"
            );
        }
        Ok(self.link)
    }

    /// Must be called before any discovery, positioning or relay send.
    pub fn ensure_broadcast_active(&mut self) -> RadioResult<()> {
        if self.active != ActiveTransport::Broadcast {
            self.enable_broadcast_mode()?;
        }
        Ok(())
    }

    /// Bring infra up long enough to refresh the link status.
    ///
    /// When infra is already the active transport the link is re-associated
    /// and rechecked in place. With no networks configured the status is simply "no infra" and the
    /// radio is not touched.
    pub fn check_infra(&mut self) -> RadioResult<LinkStatus> {
        if self.networks.is_empty() {
            self.link = LinkStatus::default();
            return Ok(self.link);
        }
        if self.active == ActiveTransport::Infra {
            return self.refresh_infra();
        }
        if let Err(e) = self.enable_infra_mode() {
            self.link = LinkStatus::default();
            return Err(e);
        }
        Ok(self.link)
    }

    /// Transmit a frame on the broadcast transport.
    pub fn send(&mut self, dest: Destination, frame: &[u8]) -> RadioResult<()> {
        if self.active != ActiveTransport::Broadcast {
            return Err(RadioError::NotActive);
        }
        self.driver.send_frame(dest, frame)
    }
}
