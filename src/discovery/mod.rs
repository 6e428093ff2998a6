//! LAN discovery, lightweight state checks and wake

pub mod protocol;
pub mod scan;
pub mod transport;
#[cfg(feature = "udp")]
pub mod udp;
pub mod wake;

pub use scan::{Discovery, ScanEntry, ScanResults, ScanSummary};
pub use transport::{
    CompleteCallback, ConsoleCallback, ProbeTransport, SharedProbeTransport, SharedWakeTransport, WakeTransport,
};
#[cfg(feature = "udp")]
pub use udp::{UdpProbeTransport, UdpWakeTransport};
pub use wake::WakeEmitter;
