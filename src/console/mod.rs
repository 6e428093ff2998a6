//! Console identity and record types

pub mod ids;
pub mod record;

pub use ids::{parse_ipv4, validate_host_id, MacAddress};
pub use record::{display_name_for, ConsoleKind, ConsoleProbe, ConsoleRecord, DiscoveryState};

/// PSN account identifier used for discovery and registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PsnAccountId(pub u64);

impl std::fmt::Display for PsnAccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
