//! Application configuration
//!
//! Loaded from a TOML file; every section falls back to defaults so a
//! partial file is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::console::PsnAccountId;
use crate::constants::{DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SCAN_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::session::SessionConfig;
use crate::storage::DataPaths;
use crate::tracker::TrackerConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub discovery: DiscoveryConfig,
    pub tracker: TrackerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Where consoles and registrations live
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the platform data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long a broadcast scan collects answers
    pub scan_timeout_ms: u64,
    /// Timeout for one lightweight state check
    pub probe_timeout_ms: u64,
    /// PSN account used for scans, registration and sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psn_account_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            psn_account_id: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load from a TOML file, falling back to defaults
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Parse a TOML document strictly
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Write the default config to a file
    pub fn write_default(path: &Path) -> Result<()> {
        let text = Self::default().to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Resolve the data directory, honoring the override
    pub fn data_paths(&self) -> Result<DataPaths> {
        Ok(DataPaths::resolve(self.storage.data_dir.as_deref())?)
    }

    pub fn psn_account(&self) -> Option<PsnAccountId> {
        self.discovery.psn_account_id.map(PsnAccountId)
    }
}

// ── Tests ────────────────────────────────────────────────────────
