//! External collaborators for registration and session setup

use std::net::Ipv4Addr;

use crate::console::{ConsoleKind, PsnAccountId};
use crate::error::{NetworkError, SessionInitFailure};
use crate::storage::Credential;

/// Streaming session produced by a successful session init
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: String,
    pub ip: Ipv4Addr,
    pub kind: ConsoleKind,
    pub started_ms: u64,
}

/// Failed session-init handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInitError {
    pub kind: SessionInitFailure,
    pub message: String,
}

impl SessionInitError {
    pub fn new(kind: SessionInitFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<NetworkError> for SessionInitError {
    fn from(e: NetworkError) -> Self {
        let kind = match e {
            NetworkError::Timeout => SessionInitFailure::Timeout,
            NetworkError::AuthFailed(_) => SessionInitFailure::AuthFailed,
            NetworkError::InvalidPacket(_) => SessionInitFailure::Other,
            _ => SessionInitFailure::Network,
        };
        Self::new(kind, e.to_string())
    }
}

/// PIN-backed registration exchange
pub trait Registrar: Send + Sync {
    /// Pair with the console at `ip`; `pin` is already validated
    fn register(&self, ip: Ipv4Addr, pin: &str, psn_id: PsnAccountId) -> Result<Credential, NetworkError>;
}

/// Session-init handshake
pub trait SessionInitiator: Send + Sync {
    fn init(
        &self,
        credential: &Credential,
        ip: Ipv4Addr,
        kind: ConsoleKind,
        firmware_version: u32,
    ) -> Result<SessionHandle, SessionInitError>;
}

/// Receives the session once streaming starts
pub trait MediaSink: Send + Sync {
    fn attach(&self, session: SessionHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_classify() {
        assert_eq!(SessionInitError::from(NetworkError::Timeout).kind, SessionInitFailure::Timeout);
        assert_eq!(
            SessionInitError::from(NetworkError::AuthFailed("bad key".into())).kind,
            SessionInitFailure::AuthFailed
        );
        assert_eq!(
            SessionInitError::from(NetworkError::SendFailed("down".into())).kind,
            SessionInitFailure::Network
        );
    }
}
