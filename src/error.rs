//! Error types for the remote-play connection plane

use std::path::PathBuf;

use thiserror::Error;

use crate::session::{SessionEvent, SessionState};

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors (console cache and credential store)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("File I/O failed on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Data directory unavailable")]
    NoDataDir,
}

/// Console registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry not initialized")]
    NotInitialized,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Console already exists: {0}")]
    ConsoleExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Console cache full ({0} entries)")]
    CacheFull(usize),

    #[error("No registration for {0}")]
    NotRegistered(String),

    #[error("Registration for {0} is corrupted; pair the console again")]
    RegistrationCorrupted(String),
}

/// Network errors raised by discovery, wake and registration transports
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Invalid packet format: {0}")]
    InvalidPacket(String),

    #[error("Authentication rejected: {0}")]
    AuthFailed(String),

    #[error("Timeout")]
    Timeout,
}

/// Why a wake attempt did not bring the console up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeFailure {
    /// The console never answered a state check
    Unreachable,
    /// The console answered but stayed in standby
    StillStandby,
    /// State checks failed at the socket level
    NetworkError,
    /// No usable credential for the console
    NotRegistered,
}

impl std::fmt::Display for WakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Unreachable => "console unreachable; check that it is on the same network",
            Self::StillStandby => "console is still in standby; enable remote wake in its power settings",
            Self::NetworkError => "network error while waiting for the console",
            Self::NotRegistered => "console is not registered; pair it with a PIN first",
        };
        f.write_str(msg)
    }
}

/// Classification of a failed session-init handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInitFailure {
    Network,
    Timeout,
    AuthFailed,
    Other,
}

impl std::fmt::Display for SessionInitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::AuthFailed => "authentication failed",
            Self::Other => "other",
        };
        f.write_str(msg)
    }
}

/// Session state machine and coordinator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Event {event} not valid in state {state}")]
    InvalidState {
        state: SessionState,
        event: SessionEvent,
    },

    #[error("Retry not allowed for another {remaining_ms} ms")]
    RetryTooSoon { remaining_ms: u64 },

    #[error("Not streaming")]
    NotConnected,

    #[error("PSN account not configured")]
    PsnNotConfigured,

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Wake failed: {0}")]
    WakeFailed(WakeFailure),

    #[error("Session init failed ({kind}): {message}")]
    InitFailed {
        kind: SessionInitFailure,
        message: String,
    },

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Background task failed to start: {0}")]
    Spawn(String),
}

/// Flat error taxonomy surfaced to UI callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParam,
    NotInitialized,
    Memory,
    FileIo,
    FileNotFound,
    ParseFailed,
    BufferTooSmall,
    InvalidData,
    InvalidState,
    ConsoleExists,
    ConsoleNotFound,
    CacheFull,
    NotFound,
    NotRegistered,
    RegistrationCorrupted,
    PsnNotConfigured,
    AuthFailed,
    Network,
    Timeout,
    NotConnected,
    Init,
}

impl Error {
    /// Map this error onto the flat taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage(e) => e.kind(),
            Error::Registry(e) => e.kind(),
            Error::Network(e) => e.kind(),
            Error::Session(e) => e.kind(),
            Error::Config(_) => ErrorKind::InvalidParam,
            Error::Io(_) => ErrorKind::FileIo,
        }
    }
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::FileNotFound(_) => ErrorKind::FileNotFound,
            StorageError::FileIo { .. } | StorageError::Serialize(_) => ErrorKind::FileIo,
            StorageError::ParseFailed(_) => ErrorKind::ParseFailed,
            StorageError::InvalidData(_) => ErrorKind::InvalidData,
            StorageError::NoDataDir => ErrorKind::Init,
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotInitialized => ErrorKind::NotInitialized,
            RegistryError::InvalidParam(_) => ErrorKind::InvalidParam,
            RegistryError::ConsoleExists(_) => ErrorKind::ConsoleExists,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::CacheFull(_) => ErrorKind::CacheFull,
            RegistryError::NotRegistered(_) => ErrorKind::NotRegistered,
            RegistryError::RegistrationCorrupted(_) => ErrorKind::RegistrationCorrupted,
        }
    }
}

impl NetworkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::PacketTooLarge(_) => ErrorKind::BufferTooSmall,
            NetworkError::AuthFailed(_) => ErrorKind::AuthFailed,
            NetworkError::Timeout => ErrorKind::Timeout,
            NetworkError::BindFailed(_)
            | NetworkError::SendFailed(_)
            | NetworkError::ReceiveFailed(_)
            | NetworkError::InvalidPacket(_) => ErrorKind::Network,
        }
    }
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidState { .. } | SessionError::RetryTooSoon { .. } => {
                ErrorKind::InvalidState
            }
            SessionError::NotConnected => ErrorKind::NotConnected,
            SessionError::PsnNotConfigured => ErrorKind::PsnNotConfigured,
            SessionError::InvalidPin(_) => ErrorKind::InvalidParam,
            SessionError::WakeFailed(WakeFailure::NotRegistered) => ErrorKind::NotRegistered,
            SessionError::WakeFailed(WakeFailure::NetworkError) => ErrorKind::Network,
            SessionError::WakeFailed(_) => ErrorKind::Timeout,
            SessionError::InitFailed { kind, .. } => match kind {
                SessionInitFailure::Network => ErrorKind::Network,
                SessionInitFailure::Timeout => ErrorKind::Timeout,
                SessionInitFailure::AuthFailed => ErrorKind::AuthFailed,
                SessionInitFailure::Other => ErrorKind::Init,
            },
            SessionError::Cancelled => ErrorKind::InvalidState,
            SessionError::Spawn(_) => ErrorKind::Init,
        }
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
