//! Broadcast radio emulated over a UDP segment
//!
//! Every node on the segment binds the same UDP port with address reuse and
//! transmits to the IPv4 broadcast address. A datagram carries a small link
//! header in front of the envelope bytes:
//!
//! ```text
//! [dest: 6][src: 6][channel: 1][frame ...]
//! ```
//!
//! The infra side is a plain TCP reachability check against the configured
//! monitoring endpoint.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use swarmlink_core::InfraNetwork;
use swarmlink_mesh::RxSender;
use swarmlink_radio::{Destination, RadioAddress, RadioDriver, RadioError, RadioResult, ReceivedFrame};
use swarmlink_rf::Rssi;
use tracing::{debug, info, warn};

const HEADER_LEN: usize = 13;
const MAX_DATAGRAM: usize = 2048;
const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const ENDPOINT_PROBE_TIMEOUT: Duration = Duration::from_millis(800);

/// State shared with the receive thread
#[derive(Debug)]
struct Shared {
    listening: AtomicBool,
    channel: AtomicU8,
    closed: AtomicBool,
}

pub struct UdpRadio {
    address: RadioAddress,
    socket: UdpSocket,
    target: SocketAddr,
    shared: Arc<Shared>,
    endpoint: Option<String>,
    infra_connected: bool,
}

impl UdpRadio {
    /// Bind the segment port and start handing received frames to `rx`
    pub fn open(
        address: RadioAddress,
        port: u16,
        link_rssi: Rssi,
        endpoint: Option<String>,
        rx: RxSender,
    ) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(not(target_os = "windows"))]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        let bind: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&bind.into())?;
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;

        let shared = Arc::new(Shared {
            listening: AtomicBool::new(false),
            channel: AtomicU8::new(0),
            closed: AtomicBool::new(false),
        });

        let reader = socket.try_clone()?;
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("udp-radio-rx".into())
            .spawn(move || receive_loop(reader, address, link_rssi, thread_shared, rx))?;

        info!(%address, port, "UDP radio bound");
        Ok(Self {
            address,
            socket,
            target: SocketAddrV4::new(Ipv4Addr::BROADCAST, port).into(),
            shared,
            endpoint,
            infra_connected: false,
        })
    }
}

impl Drop for UdpRadio {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Relaxed);
    }
}

fn encode_datagram(dest: RadioAddress, src: RadioAddress, channel: u8, frame: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(HEADER_LEN + frame.len());
    datagram.extend_from_slice(&dest.octets());
    datagram.extend_from_slice(&src.octets());
    datagram.push(channel);
    datagram.extend_from_slice(frame);
    datagram
}

/// Split a datagram into `(dest, src, channel, frame)`
fn decode_datagram(datagram: &[u8]) -> Option<(RadioAddress, RadioAddress, u8, &[u8])> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    let mut dest = [0u8; 6];
    let mut src = [0u8; 6];
    dest.copy_from_slice(&datagram[0..6]);
    src.copy_from_slice(&datagram[6..12]);
    Some((RadioAddress::new(dest), RadioAddress::new(src), datagram[12], &datagram[HEADER_LEN..]))
}

fn receive_loop(socket: UdpSocket, own: RadioAddress, rssi: Rssi, shared: Arc<Shared>, rx: RxSender) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while !shared.closed.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!(error = %e, "UDP receive failed");
                continue;
            }
        };
        let Some((dest, src, channel, frame)) = decode_datagram(&buf[..len]) else {
            continue;
        };
        if src == own || (!dest.is_broadcast() && dest != own) {
            continue;
        }
        if !shared.listening.load(Ordering::Relaxed) || channel != shared.channel.load(Ordering::Relaxed) {
            continue;
        }
        if !rx.push(ReceivedFrame {
            from: src,
            rssi,
            data: frame.to_vec(),
        }) {
            debug!(from = %src, "receive queue full, frame dropped");
        }
    }
}

impl RadioDriver for UdpRadio {
    fn address(&self) -> RadioAddress {
        self.address
    }

    fn start_broadcast(&mut self, channel: u8) -> RadioResult<()> {
        self.shared.channel.store(channel, Ordering::Relaxed);
        self.shared.listening.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop_broadcast(&mut self) -> RadioResult<()> {
        self.shared.listening.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn connect_infra(&mut self, networks: &[InfraNetwork]) -> RadioResult<bool> {
        // The host's own network stands in for whichever network is listed first
        self.infra_connected = !networks.is_empty();
        Ok(self.infra_connected)
    }

    fn disconnect_infra(&mut self) -> RadioResult<()> {
        self.infra_connected = false;
        Ok(())
    }

    fn probe_endpoint(&mut self) -> bool {
        if !self.infra_connected {
            return false;
        }
        let Some(endpoint) = self.endpoint.as_deref() else {
            return false;
        };
        let Ok(mut addrs) = endpoint.to_socket_addrs() else {
            return false;
        };
        addrs.any(|addr| TcpStream::connect_timeout(&addr, ENDPOINT_PROBE_TIMEOUT).is_ok())
    }

    fn send_frame(&mut self, dest: Destination, frame: &[u8]) -> RadioResult<()> {
        if !self.shared.listening.load(Ordering::Relaxed) {
            return Err(RadioError::NotActive);
        }
        let to = match dest {
            Destination::Broadcast => RadioAddress::BROADCAST,
            Destination::Unicast(addr) => addr,
        };
        let datagram = encode_datagram(to, self.address, self.shared.channel.load(Ordering::Relaxed), frame);
        self.socket
            .send_to(&datagram, self.target)
            .map(|_| ())
            .map_err(|e| RadioError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_header_layout() {
        let dest = RadioAddress::BROADCAST;
        let src = RadioAddress::new([2, 0, 0, 0, 0, 9]);
        let datagram = encode_datagram(dest, src, 6, b"{}");

        assert_eq!(datagram.len(), HEADER_LEN + 2);
        let (d, s, channel, frame) = decode_datagram(&datagram).unwrap();
        assert!(d.is_broadcast());
        assert_eq!(s, src);
        assert_eq!(channel, 6);
        assert_eq!(frame, b"{}");
    }

    #[test]
    fn test_short_datagram_rejected() {
        assert!(decode_datagram(&[0u8; HEADER_LEN - 1]).is_none());
    }
}
