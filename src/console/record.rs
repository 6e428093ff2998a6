//! Console records and discovery probes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::console::ids::MacAddress;

/// Console hardware family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ConsoleKind {
    Ps4,
    Ps4Pro,
    Ps5,
    Ps5Digital,
    #[default]
    Unknown,
}

impl ConsoleKind {
    pub fn is_ps5_family(self) -> bool {
        matches!(self, Self::Ps5 | Self::Ps5Digital)
    }

    pub fn is_ps4_family(self) -> bool {
        matches!(self, Self::Ps4 | Self::Ps4Pro)
    }

    /// Discovery and wake port for this family
    pub fn discovery_port(self) -> u16 {
        if self.is_ps4_family() {
            crate::constants::PS4_DISCOVERY_PORT
        } else {
            crate::constants::PS5_DISCOVERY_PORT
        }
    }

    /// Parse the `host-type` header of a discovery response
    pub fn from_host_type(host_type: &str) -> Self {
        match host_type.trim().to_ascii_uppercase().as_str() {
            "PS4" => Self::Ps4,
            "PS4PRO" | "PS4 PRO" => Self::Ps4Pro,
            "PS5" => Self::Ps5,
            "PS5DIGITAL" | "PS5 DIGITAL" => Self::Ps5Digital,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ps4 => "PS4",
            Self::Ps4Pro => "PS4 Pro",
            Self::Ps5 => "PS5",
            Self::Ps5Digital => "PS5 Digital Edition",
            Self::Unknown => "PlayStation",
        }
    }
}

impl From<u8> for ConsoleKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Ps4,
            1 => Self::Ps4Pro,
            2 => Self::Ps5,
            3 => Self::Ps5Digital,
            _ => Self::Unknown,
        }
    }
}

impl From<ConsoleKind> for u8 {
    fn from(kind: ConsoleKind) -> Self {
        match kind {
            ConsoleKind::Ps4 => 0,
            ConsoleKind::Ps4Pro => 1,
            ConsoleKind::Ps5 => 2,
            ConsoleKind::Ps5Digital => 3,
            ConsoleKind::Unknown => 4,
        }
    }
}

impl fmt::Display for ConsoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Liveness classification reported by discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DiscoveryState {
    #[default]
    Unknown,
    Ready,
    Standby,
}

impl From<u8> for DiscoveryState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Standby,
            _ => Self::Unknown,
        }
    }
}

impl From<DiscoveryState> for u8 {
    fn from(state: DiscoveryState) -> Self {
        match state {
            DiscoveryState::Unknown => 0,
            DiscoveryState::Ready => 1,
            DiscoveryState::Standby => 2,
        }
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Ready => "READY",
            Self::Standby => "STANDBY",
        };
        f.write_str(s)
    }
}

/// One console as reported by a discovery response
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleProbe {
    pub host_id: String,
    pub ip: String,
    pub port: u16,
    pub kind: ConsoleKind,
    pub device_name: String,
    pub firmware_version: u32,
    pub state: DiscoveryState,
    pub supports_h265: bool,
    pub signal_strength: f32,
}

impl ConsoleProbe {
    pub fn new(
        host_id: impl Into<String>,
        ip: impl Into<String>,
        kind: ConsoleKind,
        state: DiscoveryState,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            ip: ip.into(),
            port: kind.discovery_port(),
            kind,
            device_name: String::new(),
            firmware_version: 0,
            state,
            supports_h265: kind.is_ps5_family(),
            signal_strength: 1.0,
        }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn is_awake(&self) -> bool {
        self.state == DiscoveryState::Ready
    }
}

/// Persisted console record
///
/// Field names follow the on-disk cache schema. `is_registered` is a
/// cached hint only; [`crate::registry::ConsoleRegistry::is_registered`]
/// is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleRecord {
    #[serde(rename = "ip_address")]
    pub ip: String,
    pub device_name: String,
    pub display_name: String,
    pub host_id: String,
    #[serde(rename = "mac_address")]
    pub mac: String,
    #[serde(rename = "console_type")]
    pub kind: ConsoleKind,
    pub port: u16,
    pub supports_h265: bool,
    #[serde(rename = "fw_version")]
    pub firmware_version: u32,
    pub is_favorite: bool,
    #[serde(rename = "last_connected")]
    pub last_connected_ms: u64,
    #[serde(rename = "last_seen")]
    pub last_seen_ms: u64,
    pub connection_count: u32,
    #[serde(rename = "added_timestamp")]
    pub added_ms: u64,
    pub discovery_state: DiscoveryState,
    #[serde(rename = "state_changed")]
    pub state_changed_ms: u64,
    pub signal_strength: f32,
    pub is_registered: bool,
}

impl Default for ConsoleRecord {
    fn default() -> Self {
        Self {
            ip: String::new(),
            device_name: String::new(),
            display_name: String::new(),
            host_id: String::new(),
            mac: String::new(),
            kind: ConsoleKind::Unknown,
            port: 0,
            supports_h265: false,
            firmware_version: 0,
            is_favorite: false,
            last_connected_ms: 0,
            last_seen_ms: 0,
            connection_count: 0,
            added_ms: 0,
            discovery_state: DiscoveryState::Unknown,
            state_changed_ms: 0,
            signal_strength: 0.0,
            is_registered: false,
        }
    }
}

impl ConsoleRecord {
    /// Build a fresh record from a first sighting
    pub fn from_probe(probe: &ConsoleProbe, now_ms: u64) -> Self {
        let mac = MacAddress::from_host_id(&probe.host_id)
            .map(|m| m.to_string())
            .unwrap_or_default();

        Self {
            ip: probe.ip.clone(),
            device_name: probe.device_name.clone(),
            display_name: display_name_for(probe),
            host_id: probe.host_id.clone(),
            mac,
            kind: probe.kind,
            port: if probe.port == 0 {
                probe.kind.discovery_port()
            } else {
                probe.port
            },
            supports_h265: probe.supports_h265,
            firmware_version: probe.firmware_version,
            is_favorite: false,
            last_connected_ms: 0,
            last_seen_ms: now_ms,
            connection_count: 0,
            added_ms: now_ms,
            discovery_state: probe.state,
            state_changed_ms: now_ms,
            signal_strength: probe.signal_strength.clamp(0.0, 1.0),
            is_registered: false,
        }
    }

    /// Merge a repeated sighting into this record
    pub fn refresh_from_probe(&mut self, probe: &ConsoleProbe, now_ms: u64) {
        if self.discovery_state != probe.state {
            self.state_changed_ms = now_ms;
        }
        self.discovery_state = probe.state;
        if !probe.device_name.is_empty() {
            self.device_name = probe.device_name.clone();
        }
        if probe.firmware_version != 0 {
            self.firmware_version = probe.firmware_version;
        }
        self.ip = probe.ip.clone();
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
        self.signal_strength = probe.signal_strength.clamp(0.0, 1.0);
    }

    pub fn is_empty_slot(&self) -> bool {
        self.host_id.is_empty() || self.ip.is_empty()
    }
}

fn is_generic_name(name: &str) -> bool {
    let name = name.trim();
    name.is_empty()
        || ["PS4", "PS5", "PlayStation", "PlayStation 4", "PlayStation 5", "Unknown"]
            .iter()
            .any(|g| name.eq_ignore_ascii_case(g))
}

/// Friendly name for a console whose own name is missing or generic
pub fn display_name_for(probe: &ConsoleProbe) -> String {
    if is_generic_name(&probe.device_name) {
        format!("{} ({})", probe.kind.label(), probe.ip)
    } else {
        probe.device_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_integer_mapping_is_stable() {
        for kind in [
            ConsoleKind::Ps4,
            ConsoleKind::Ps4Pro,
            ConsoleKind::Ps5,
            ConsoleKind::Ps5Digital,
            ConsoleKind::Unknown,
        ] {
            assert_eq!(ConsoleKind::from(u8::from(kind)), kind);
        }
        assert_eq!(ConsoleKind::from(99), ConsoleKind::Unknown);
        assert_eq!(DiscoveryState::from(7), DiscoveryState::Unknown);
    }

    #[test]
    fn generic_names_get_synthesized() {
        let probe = ConsoleProbe::new("HID1", "192.168.1.50", ConsoleKind::Ps5, DiscoveryState::Ready)
            .with_device_name("PS5");
        let record = ConsoleRecord::from_probe(&probe, 10);
        assert_eq!(record.display_name, "PS5 (192.168.1.50)");

        let named = probe.clone().with_device_name("Living Room");
        assert_eq!(display_name_for(&named), "Living Room");
    }

    #[test]
    fn refresh_never_rewinds_last_seen() {
        let probe = ConsoleProbe::new("HID1", "10.0.0.2", ConsoleKind::Ps4, DiscoveryState::Standby);
        let mut record = ConsoleRecord::from_probe(&probe, 5_000);
        let awake = ConsoleProbe {
            state: DiscoveryState::Ready,
            ..probe
        };
        record.refresh_from_probe(&awake, 1_000);
        assert_eq!(record.last_seen_ms, 5_000);
        assert_eq!(record.discovery_state, DiscoveryState::Ready);
        assert_eq!(record.state_changed_ms, 1_000);
    }

    #[test]
    fn record_json_uses_schema_names() {
        let probe = ConsoleProbe::new("F8461C0A1B2C", "10.0.0.9", ConsoleKind::Ps5, DiscoveryState::Standby);
        let record = ConsoleRecord::from_probe(&probe, 42);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ip_address"], "10.0.0.9");
        assert_eq!(json["console_type"], 2);
        assert_eq!(json["discovery_state"], 2);
        assert_eq!(json["mac_address"], "F8:46:1C:0A:1B:2C");
        assert_eq!(json["added_timestamp"], 42);
    }
}
