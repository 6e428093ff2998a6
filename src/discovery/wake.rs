//! Wake emitter
//!
//! Sends exactly one wake datagram per call and returns. Waiting for the
//! console to come up is the tracker's (or the coordinator's) job.

use crate::console::{parse_ipv4, ConsoleKind};
use crate::discovery::transport::SharedWakeTransport;
use crate::error::{RegistryError, Result};
use crate::registry::ConsoleRegistry;
use crate::storage::Credential;

pub struct WakeEmitter {
    transport: SharedWakeTransport,
}

impl WakeEmitter {
    pub fn new(transport: SharedWakeTransport) -> Self {
        Self { transport }
    }

    /// Wake the console at `ip` using its stored credential
    pub fn wake(&self, registry: &ConsoleRegistry, ip: &str) -> Result<()> {
        parse_ipv4(ip)?;
        let credential = registry
            .credential(ip)
            .filter(Credential::is_usable)
            .ok_or_else(|| RegistryError::NotRegistered(ip.to_string()))?;
        let kind = registry
            .find_by_ip(ip)
            .map(|r| r.kind)
            .unwrap_or(credential.kind);
        self.send(&credential, ip, kind)
    }

    /// Wake with an explicit credential
    pub fn send(&self, credential: &Credential, ip: &str, kind: ConsoleKind) -> Result<()> {
        let addr = parse_ipv4(ip)?;
        if !credential.is_usable() || credential.wake_value().is_none() {
            return Err(RegistryError::NotRegistered(ip.to_string()).into());
        }
        self.transport.send(credential, addr, kind).map_err(|e| {
            tracing::warn!(ip = %ip, "Wake datagram failed: {}", e);
            e
        })?;
        tracing::info!(ip = %ip, kind = %kind, "Wake datagram sent");
        Ok(())
    }
}
