//! LAN discovery datagram codec
//!
//! Discovery is an HTTP-like text protocol over UDP. Clients send
//! `SRCH` to probe and `WAKEUP` to power a console on; consoles answer
//! with a status line and `key:value` headers.
//!
//! ```text
//! SRCH * HTTP/1.1                      HTTP/1.1 200 Ok
//! device-discovery-protocol-version:   host-id:F8461C0A1B2C
//!     00030010                         host-type:PS5
//!                                      host-name:Living Room
//!                                      host-request-port:997
//!                                      system-version:09040008
//! ```

use std::collections::HashMap;

use crate::console::{ConsoleKind, ConsoleProbe, DiscoveryState};
use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;

/// Protocol version header value for a console family
pub fn protocol_version(kind: ConsoleKind) -> &'static str {
    if kind.is_ps4_family() {
        "00020020"
    } else {
        "00030010"
    }
}

/// Search datagram
pub fn format_search(kind: ConsoleKind) -> Vec<u8> {
    format!(
        "SRCH * HTTP/1.1\ndevice-discovery-protocol-version:{}\n",
        protocol_version(kind)
    )
    .into_bytes()
}

/// Wake datagram carrying the decimal wake credential
pub fn format_wakeup(wake_credential: u64, kind: ConsoleKind) -> Result<Vec<u8>, NetworkError> {
    let packet = format!(
        "WAKEUP * HTTP/1.1\n\
         client-type:vr\n\
         auth-type:R\n\
         model:w\n\
         app-type:r\n\
         user-credential:{}\n\
         device-discovery-protocol-version:{}\n",
        wake_credential,
        protocol_version(kind)
    )
    .into_bytes();
    if packet.len() > MAX_PACKET_SIZE {
        return Err(NetworkError::PacketTooLarge(packet.len()));
    }
    Ok(packet)
}

/// Parsed console response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

impl Response {
    pub fn state(&self) -> DiscoveryState {
        match self.status {
            200 => DiscoveryState::Ready,
            620 => DiscoveryState::Standby,
            _ => DiscoveryState::Unknown,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Convert into a probe for the console that sent it
    pub fn into_probe(self, ip: &str) -> Result<ConsoleProbe, NetworkError> {
        let host_id = self
            .header("host-id")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| NetworkError::InvalidPacket("missing host-id".into()))?
            .to_string();
        let kind = ConsoleKind::from_host_type(self.header("host-type").unwrap_or(""));
        let mut probe = ConsoleProbe::new(host_id, ip, kind, self.state());
        if let Some(name) = self.header("host-name") {
            probe.device_name = name.to_string();
        }
        if let Some(port) = self.header("host-request-port").and_then(|p| p.parse().ok()) {
            probe.port = port;
        }
        if let Some(version) = self.header("system-version").and_then(|v| v.parse().ok()) {
            probe.firmware_version = version;
        }
        Ok(probe)
    }
}

/// Parse a console response datagram
pub fn parse_response(datagram: &[u8]) -> Result<Response, NetworkError> {
    let text = std::str::from_utf8(datagram)
        .map_err(|_| NetworkError::InvalidPacket("response is not UTF-8".into()))?;
    let mut lines = text.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| NetworkError::InvalidPacket("empty response".into()))?;
    let mut parts = status_line.split_whitespace();
    if !parts.next().map(|p| p.starts_with("HTTP/")).unwrap_or(false) {
        return Err(NetworkError::InvalidPacket(format!("bad status line {:?}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| NetworkError::InvalidPacket(format!("bad status line {:?}", status_line)))?;

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    Ok(Response { status, headers })
}
