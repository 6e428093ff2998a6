//! UDP transports for discovery and wake
//!
//! Scans broadcast a search datagram on both discovery ports and collect
//! answers on a short-lived thread. State checks and wake datagrams are
//! unicast to the console.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::console::{ConsoleKind, DiscoveryState, PsnAccountId};
use crate::constants::{MAX_PACKET_SIZE, PS4_DISCOVERY_PORT, PS5_DISCOVERY_PORT};
use crate::discovery::protocol;
use crate::discovery::transport::{CompleteCallback, ConsoleCallback, ProbeTransport, WakeTransport};
use crate::error::NetworkError;
use crate::storage::Credential;

/// Receive poll slice so a scan notices its deadline
const RECV_SLICE: Duration = Duration::from_millis(100);

/// Bind an ephemeral IPv4 UDP socket
pub fn create_socket(broadcast: bool) -> Result<UdpSocket, NetworkError> {
    let bind_err = |e: io::Error| NetworkError::BindFailed(e.to_string());

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_broadcast(broadcast).map_err(bind_err)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&addr.into()).map_err(bind_err)?;
    Ok(socket.into())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn send_to(socket: &UdpSocket, packet: &[u8], target: SocketAddrV4) -> Result<(), NetworkError> {
    socket
        .send_to(packet, target)
        .map(|_| ())
        .map_err(|e| NetworkError::SendFailed(format!("{}: {}", target, e)))
}

/// Broadcast scanner and unicast state checker
#[derive(Debug, Clone)]
pub struct UdpProbeTransport {
    broadcast: Ipv4Addr,
    /// Overrides the per-family discovery port for state checks
    state_port: Option<u16>,
}

impl UdpProbeTransport {
    pub fn new() -> Self {
        Self {
            broadcast: Ipv4Addr::BROADCAST,
            state_port: None,
        }
    }

    /// Scan a directed broadcast address instead of 255.255.255.255
    pub fn with_broadcast(broadcast: Ipv4Addr) -> Self {
        Self {
            broadcast,
            state_port: None,
        }
    }

    /// Send state checks to `port` regardless of console family
    pub fn with_state_port(mut self, port: u16) -> Self {
        self.state_port = Some(port);
        self
    }
}

impl Default for UdpProbeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeTransport for UdpProbeTransport {
    fn start(
        &self,
        psn_id: Option<PsnAccountId>,
        on_console: ConsoleCallback,
        on_complete: CompleteCallback,
        timeout: Duration,
    ) -> Result<(), NetworkError> {
        let socket = create_socket(true)?;
        socket
            .set_read_timeout(Some(RECV_SLICE))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        for (kind, port) in [(ConsoleKind::Ps4, PS4_DISCOVERY_PORT), (ConsoleKind::Ps5, PS5_DISCOVERY_PORT)] {
            send_to(&socket, &protocol::format_search(kind), SocketAddrV4::new(self.broadcast, port))?;
        }
        tracing::debug!(psn = ?psn_id, broadcast = %self.broadcast, "Search datagrams sent");

        std::thread::Builder::new()
            .name("rp-discovery".into())
            .spawn(move || {
                let deadline = Instant::now() + timeout;
                let mut buf = [0u8; MAX_PACKET_SIZE];
                while Instant::now() < deadline {
                    match socket.recv_from(&mut buf) {
                        Ok((len, SocketAddr::V4(from))) => {
                            let ip = from.ip().to_string();
                            match protocol::parse_response(&buf[..len]).and_then(|r| r.into_probe(&ip)) {
                                Ok(probe) => on_console(probe),
                                Err(e) => tracing::debug!(from = %from, "Ignoring datagram: {}", e),
                            }
                        }
                        Ok(_) => {}
                        Err(e) if is_timeout(&e) => {}
                        Err(e) => {
                            tracing::warn!("Discovery receive failed: {}", e);
                            break;
                        }
                    }
                }
                on_complete();
            })
            .map_err(|e| NetworkError::BindFailed(format!("discovery thread: {}", e)))?;
        Ok(())
    }

    fn lightweight_state(
        &self,
        ip: Ipv4Addr,
        kind: ConsoleKind,
        timeout: Duration,
    ) -> Result<DiscoveryState, NetworkError> {
        let socket = create_socket(false)?;
        let port = self.state_port.unwrap_or_else(|| kind.discovery_port());
        let target = SocketAddrV4::new(ip, port);
        send_to(&socket, &protocol::format_search(kind), target)?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetworkError::Timeout);
            }
            socket
                .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))
                .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
            match socket.recv_from(&mut buf) {
                Ok((len, SocketAddr::V4(from))) if *from.ip() == ip => {
                    return protocol::parse_response(&buf[..len]).map(|r| r.state());
                }
                Ok(_) => {}
                Err(e) if is_timeout(&e) => return Err(NetworkError::Timeout),
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
            }
        }
    }
}

/// Unicast wake sender
#[derive(Debug, Clone, Default)]
pub struct UdpWakeTransport;

impl WakeTransport for UdpWakeTransport {
    fn send(&self, credential: &Credential, ip: Ipv4Addr, kind: ConsoleKind) -> Result<(), NetworkError> {
        let value = credential
            .wake_value()
            .ok_or_else(|| NetworkError::InvalidPacket("wake credential is not numeric".into()))?;
        let packet = protocol::format_wakeup(value, kind)?;
        let socket = create_socket(false)?;
        send_to(&socket, &packet, SocketAddrV4::new(ip, kind.discovery_port()))
    }
}
