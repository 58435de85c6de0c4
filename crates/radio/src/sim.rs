//! In-memory radio medium
//!
//! `SimAir` stands in for the shared RF environment: every `SimRadio` created
//! from it can hear broadcasts from the others while its broadcast transport
//! is up, with a per-link RSSI. Infra availability is toggled per station.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use swarmlink_core::InfraNetwork;
use swarmlink_rf::Rssi;

use crate::address::RadioAddress;
use crate::error::{RadioError, RadioResult};
use crate::radio::{Destination, RadioDriver, ReceivedFrame};

const DEFAULT_LINK_RSSI: Rssi = -55;

#[derive(Debug, Default)]
struct Station {
    listening: bool,
    infra_available: bool,
    endpoint_available: bool,
    infra_connected: bool,
    inbox: VecDeque<ReceivedFrame>,
    sent: Vec<(Destination, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct AirState {
    stations: HashMap<RadioAddress, Station>,
    /// Per directed link RSSI; `None` means out of range
    links: HashMap<(RadioAddress, RadioAddress), Option<Rssi>>,
}

impl AirState {
    fn link(&self, from: RadioAddress, to: RadioAddress) -> Option<Rssi> {
        self.links
            .get(&(from, to))
            .copied()
            .unwrap_or(Some(DEFAULT_LINK_RSSI))
    }

    fn deliver(&mut self, from: RadioAddress, to: RadioAddress, data: &[u8]) {
        let Some(rssi) = self.link(from, to) else {
            return;
        };
        if let Some(station) = self.stations.get_mut(&to) {
            if station.listening {
                station.inbox.push_back(ReceivedFrame {
                    from,
                    rssi,
                    data: data.to_vec(),
                });
            }
        }
    }
}

/// Shared simulated medium
#[derive(Debug, Clone, Default)]
pub struct SimAir {
    state: Arc<Mutex<AirState>>,
}

impl SimAir {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AirState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a station and return its driver
    pub fn radio(&self, address: RadioAddress) -> SimRadio {
        self.lock().stations.entry(address).or_default();
        SimRadio {
            address,
            air: self.clone(),
        }
    }

    /// Set the RSSI seen in both directions between two stations
    pub fn set_link_rssi(&self, a: RadioAddress, b: RadioAddress, rssi: Rssi) {
        let mut state = self.lock();
        state.links.insert((a, b), Some(rssi));
        state.links.insert((b, a), Some(rssi));
    }

    /// Put two stations out of each other's range
    pub fn set_out_of_range(&self, a: RadioAddress, b: RadioAddress) {
        let mut state = self.lock();
        state.links.insert((a, b), None);
        state.links.insert((b, a), None);
    }

    /// Control what a station finds when it brings infra up
    pub fn set_infra(&self, address: RadioAddress, infra_available: bool, endpoint_available: bool) {
        let mut state = self.lock();
        let station = state.stations.entry(address).or_default();
        station.infra_available = infra_available;
        station.endpoint_available = endpoint_available;
    }

    /// Take every frame queued for a station
    pub fn drain(&self, address: RadioAddress) -> Vec<ReceivedFrame> {
        self.lock()
            .stations
            .get_mut(&address)
            .map(|s| s.inbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Frames a station has transmitted so far
    pub fn sent(&self, address: RadioAddress) -> Vec<(Destination, Vec<u8>)> {
        self.lock()
            .stations
            .get(&address)
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }
}

/// Driver for one station on a [`SimAir`]
#[derive(Debug, Clone)]
pub struct SimRadio {
    address: RadioAddress,
    air: SimAir,
}

impl SimRadio {
    pub fn air(&self) -> &SimAir {
        &self.air
    }

    pub fn drain(&self) -> Vec<ReceivedFrame> {
        self.air.drain(self.address)
    }
}

impl RadioDriver for SimRadio {
    fn address(&self) -> RadioAddress {
        self.address
    }

    fn start_broadcast(&mut self, _channel: u8) -> RadioResult<()> {
        let mut state = self.air.lock();
        let station = state
            .stations
            .get_mut(&self.address)
            .ok_or_else(|| RadioError::Init(format!("{} not registered", self.address)))?;
        station.listening = true;
        Ok(())
    }

    fn stop_broadcast(&mut self) -> RadioResult<()> {
        if let Some(station) = self.air.lock().stations.get_mut(&self.address) {
            station.listening = false;
        }
        Ok(())
    }

    fn connect_infra(&mut self, networks: &[InfraNetwork]) -> RadioResult<bool> {
        let mut state = self.air.lock();
        let station = state
            .stations
            .get_mut(&self.address)
            .ok_or_else(|| RadioError::Init(format!("{} not registered", self.address)))?;
        station.infra_connected = station.infra_available && !networks.is_empty();
        Ok(station.infra_connected)
    }

    fn disconnect_infra(&mut self) -> RadioResult<()> {
        if let Some(station) = self.air.lock().stations.get_mut(&self.address) {
            station.infra_connected = false;
        }
        Ok(())
    }

    fn probe_endpoint(&mut self) -> bool {
        self.air
            .lock()
            .stations
            .get(&self.address)
            .map(|s| s.infra_connected && s.endpoint_available)
            .unwrap_or(false)
    }

    fn send_frame(&mut self, dest: Destination, frame: &[u8]) -> RadioResult<()> {
        let mut state = self.air.lock();
        let from = self.address;
        match state.stations.get_mut(&from) {
            Some(station) if station.listening => station.sent.push((dest, frame.to_vec())),
            _ => return Err(RadioError::Send(format!("{} broadcast transport down", from))),
        }

        match dest {
            Destination::Broadcast => {
                let others: Vec<RadioAddress> =
                    state.stations.keys().copied().filter(|a| *a != from).collect();
                for to in others {
                    state.deliver(from, to, frame);
                }
            }
            Destination::Unicast(to) => state.deliver(from, to, frame),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> RadioAddress {
        RadioAddress::new([2, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_broadcast_reaches_listening_stations_only() {
        let air = SimAir::new();
        let mut a = air.radio(addr(1));
        let mut b = air.radio(addr(2));
        let _c = air.radio(addr(3));

        a.start_broadcast(1).unwrap();
        b.start_broadcast(1).unwrap();
        a.send_frame(Destination::Broadcast, b"hello").unwrap();

        let frames = b.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].from, addr(1));
        assert_eq!(frames[0].rssi, DEFAULT_LINK_RSSI);
        assert!(air.drain(addr(3)).is_empty());
    }

    #[test]
    fn test_unicast_and_link_rssi() {
        let air = SimAir::new();
        let mut a = air.radio(addr(1));
        let mut b = air.radio(addr(2));
        let mut c = air.radio(addr(3));
        for r in [&mut a, &mut b, &mut c] {
            r.start_broadcast(1).unwrap();
        }
        air.set_link_rssi(addr(1), addr(2), -70);
        air.set_out_of_range(addr(1), addr(3));

        a.send_frame(Destination::Unicast(addr(2)), b"p2p").unwrap();
        a.send_frame(Destination::Broadcast, b"all").unwrap();

        let at_b = b.drain();
        assert_eq!(at_b.len(), 2);
        assert!(at_b.iter().all(|f| f.rssi == -70));
        assert!(c.drain().is_empty());
    }

    #[test]
    fn test_send_while_down_fails() {
        let air = SimAir::new();
        let mut a = air.radio(addr(1));
        assert!(a.send_frame(Destination::Broadcast, b"x").is_err());
    }

    #[test]
    fn test_infra_follows_station_settings() {
        let air = SimAir::new();
        let mut a = air.radio(addr(1));
        let nets = vec![InfraNetwork {
            ssid: "x".into(),
            password: "y".into(),
        }];

        assert!(!a.connect_infra(&nets).unwrap());
        air.set_infra(addr(1), true, true);
        assert!(a.connect_infra(&nets).unwrap());
        assert!(a.probe_endpoint());
        a.disconnect_infra().unwrap();
        assert!(!a.probe_endpoint());
    }
}
