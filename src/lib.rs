//! # rpconnect
//!
//! Connection plane for PlayStation remote play: which consoles exist,
//! whether they are registered, whether they are awake, and how to get
//! from "idle" to "streaming".
//!
//! ## Architecture Overview
//!
//! ```text
//!                 UI / rpctl (bin/rpctl)
//!                   │                ▲
//!   start_streaming │                │ registry events
//!   register/cancel ▼                │
//!  ┌─────────────────────────────┐   │
//!  │ SessionCoordinator (session)│   │
//!  │   SessionMachine            │   │
//!  │   IDLE ► ... ► STREAMING    │   │
//!  └──┬─────────┬─────────────┬──┘   │
//!     │ pause   │ wake, poll  │ credential
//!     ▼         ▼             ▼      │
//!  ┌───────┐ ┌───────────┐ ┌─────────┴──────────────────────┐
//!  │Tracker│►│ Discovery │►│ ConsoleRegistry (registry)     │
//!  │thread │ │ scan/wake │ │ cache, credentials, memo       │
//!  └───────┘ └─────┬─────┘ └───────────────┬────────────────┘
//!                  │ UDP 987 / 9302        │ atomic JSON writes (storage)
//!                  ▼                       ▼
//!             LAN consoles       consoles.json, registrations.json
//! ```

pub mod clock;
pub mod config;
pub mod console;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod session;
pub mod storage;
pub mod tracker;

pub use error::{Error, ErrorKind, Result};

/// Application-wide constants
pub mod constants {
    /// Application name used for the data directory
    pub const APP_NAME: &str = "rpconnect";

    /// Console cache file inside the data directory
    pub const CONSOLES_FILE: &str = "consoles.json";

    /// Credential store file inside the data directory
    pub const REGISTRATIONS_FILE: &str = "registrations.json";

    /// Current console cache schema
    pub const CACHE_SCHEMA_VERSION: u32 = 1;

    /// Current credential store schema
    pub const CREDENTIAL_SCHEMA_VERSION: u32 = 1;

    /// Maximum number of cached consoles
    pub const MAX_CONSOLES: usize = 16;

    /// Maximum host id length
    pub const MAX_HOST_ID_LEN: usize = 32;

    /// Registration keys with this prefix are placeholders
    pub const MOCK_KEY_PREFIX: &str = "MOCK";

    /// Registration PIN length
    pub const PIN_LENGTH: usize = 8;

    /// Discovery port for the PS4 family
    pub const PS4_DISCOVERY_PORT: u16 = 987;

    /// Discovery port for the PS5 family
    pub const PS5_DISCOVERY_PORT: u16 = 9302;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Default broadcast scan duration
    pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 3_000;

    /// Default timeout for one lightweight state check
    pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;

    // Tracker

    pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 5_000;
    pub const DEFAULT_TRACKER_SLEEP_MS: u64 = 1_000;
    pub const DEFAULT_MAX_CONSOLES_PER_CYCLE: usize = 4;
    pub const DEFAULT_STAGGER_MS: u64 = 100;

    /// Re-probe interval for consoles in UNKNOWN
    pub const UNKNOWN_RECHECK_MS: u64 = 2_000;

    /// Re-probe interval for consoles in READY
    pub const READY_RECHECK_MS: u64 = 4_000;

    /// Re-probe interval for consoles in STANDBY
    pub const STANDBY_RECHECK_MS: u64 = 8_000;

    /// READY to STANDBY flips closer than this to the last change are ignored
    pub const STANDBY_DEBOUNCE_MS: u64 = 3_000;

    /// Probe failures within this window of the last answer keep the state
    pub const FAILURE_GRACE_MS: u64 = 30_000;

    /// Bounded wait for the tracker thread on stop
    pub const TRACKER_STOP_TIMEOUT_MS: u64 = 5_000;

    // Session

    pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_WAKE_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_SESSION_INIT_TIMEOUT_MS: u64 = 15_000;
    pub const DEFAULT_RECONNECT_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_MAX_WAKE_ATTEMPTS: u32 = 3;
    pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;
    pub const DEFAULT_WAKE_POLL_INTERVAL_MS: u64 = 2_000;
}
