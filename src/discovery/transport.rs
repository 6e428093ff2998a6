//! Transport surface consumed by discovery and wake
//!
//! Implementations own the sockets and the datagram format; discovery
//! only drives them through these traits.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::console::{ConsoleKind, ConsoleProbe, DiscoveryState, PsnAccountId};
use crate::error::NetworkError;
use crate::storage::Credential;

/// Called once per response, on the transport's receive thread
pub type ConsoleCallback = Arc<dyn Fn(ConsoleProbe) + Send + Sync>;

/// Called once when a scan ends
pub type CompleteCallback = Box<dyn FnOnce() + Send>;

/// Sends console-probe datagrams and collects responses
pub trait ProbeTransport: Send + Sync {
    /// Start a scan; returns once the scan is running
    ///
    /// Responses are delivered to `on_console` in arrival order and
    /// `on_complete` runs after `timeout` elapses.
    fn start(
        &self,
        psn_id: Option<PsnAccountId>,
        on_console: ConsoleCallback,
        on_complete: CompleteCallback,
        timeout: Duration,
    ) -> Result<(), NetworkError>;

    /// Ask one console for its state, waiting at most `timeout`
    fn lightweight_state(
        &self,
        ip: Ipv4Addr,
        kind: ConsoleKind,
        timeout: Duration,
    ) -> Result<DiscoveryState, NetworkError>;
}

/// Sends the wake datagram
pub trait WakeTransport: Send + Sync {
    fn send(&self, credential: &Credential, ip: Ipv4Addr, kind: ConsoleKind) -> Result<(), NetworkError>;
}

pub type SharedProbeTransport = Arc<dyn ProbeTransport>;
pub type SharedWakeTransport = Arc<dyn WakeTransport>;
