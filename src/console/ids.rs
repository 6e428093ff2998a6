//! Console identifiers: host id, MAC address, IPv4 address

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::constants::MAX_HOST_ID_LEN;
use crate::error::RegistryError;

/// Validate a host id: non-empty, at most 32 printable ASCII characters
pub fn validate_host_id(host_id: &str) -> Result<(), RegistryError> {
    if host_id.is_empty() {
        return Err(RegistryError::InvalidParam("empty host id".into()));
    }
    if host_id.len() > MAX_HOST_ID_LEN {
        return Err(RegistryError::InvalidParam(format!(
            "host id longer than {} characters",
            MAX_HOST_ID_LEN
        )));
    }
    if !host_id.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(RegistryError::InvalidParam(format!(
            "host id {:?} is not printable ASCII",
            host_id
        )));
    }
    Ok(())
}

/// Parse a dotted IPv4 string
pub fn parse_ipv4(ip: &str) -> Result<Ipv4Addr, RegistryError> {
    Ipv4Addr::from_str(ip.trim())
        .map_err(|_| RegistryError::InvalidParam(format!("invalid IPv4 address {:?}", ip)))
}

/// 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Consoles report their MAC as the 12 hex digit host id
    pub fn from_host_id(host_id: &str) -> Option<Self> {
        if host_id.len() != 12 {
            return None;
        }
        let bytes = hex::decode(host_id).ok()?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes);
        Some(Self(mac))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&cleaned)
            .map_err(|_| RegistryError::InvalidParam(format!("invalid MAC address {:?}", s)))?;
        if bytes.len() != 6 {
            return Err(RegistryError::InvalidParam(format!(
                "MAC address {:?} is not 48 bits",
                s
            )));
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes);
        Ok(Self(mac))
    }
}
