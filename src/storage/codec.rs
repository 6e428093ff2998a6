//! JSON persistence for the console cache and the credential store
//!
//! Reads never fail the caller: a missing or corrupt file yields an empty
//! but valid document and a log line. Writes replace the whole file.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::console::ConsoleRecord;
use crate::constants::{CACHE_SCHEMA_VERSION, MAX_CONSOLES};
use crate::error::StorageError;
use crate::storage::cache::ConsoleCache;
use crate::storage::credentials::CredentialStore;

/// On-disk shape of `consoles.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDocument {
    pub version: u32,
    pub last_updated: u64,
    pub console_count: Option<u32>,
    pub consoles: Vec<ConsoleRecord>,
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            version: CACHE_SCHEMA_VERSION,
            last_updated: 0,
            console_count: None,
            consoles: Vec::new(),
        }
    }
}

impl From<&ConsoleCache> for CacheDocument {
    fn from(cache: &ConsoleCache) -> Self {
        Self {
            version: cache.schema_version,
            last_updated: cache.last_updated_ms,
            console_count: Some(cache.console_count() as u32),
            consoles: cache.consoles().to_vec(),
        }
    }
}

impl From<CacheDocument> for ConsoleCache {
    fn from(doc: CacheDocument) -> Self {
        let declared = doc.console_count.map(|n| n as usize).unwrap_or(doc.consoles.len());
        let count = declared.min(MAX_CONSOLES).min(doc.consoles.len());
        let mut consoles = doc.consoles;
        consoles.truncate(count);
        ConsoleCache::from_records(consoles, doc.version, doc.last_updated)
    }
}

/// Decode a JSON document from `path`
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(StorageError::FileIo {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&text).map_err(|e| StorageError::ParseFailed(format!("{}: {}", path.display(), e)))
}

/// Write through a sibling temp file and rename over `path`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| StorageError::Serialize(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StorageError::FileIo {
        path: path.to_path_buf(),
        source,
    };

    let mut file = fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(text.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_err)
}

/// Strict cache read; callers decide how to recover
pub fn load_cache(path: &Path) -> Result<ConsoleCache, StorageError> {
    let doc: CacheDocument = load_json(path)?;
    Ok(doc.into())
}

/// Lenient cache read: any failure yields an empty, valid cache
pub fn read_cache(path: &Path) -> ConsoleCache {
    match load_cache(path) {
        Ok(cache) => cache,
        Err(StorageError::FileNotFound(_)) => {
            tracing::debug!("No console cache at {}; starting empty", path.display());
            ConsoleCache::new()
        }
        Err(e) => {
            tracing::warn!("Failed to read console cache: {}; starting empty", e);
            ConsoleCache::new()
        }
    }
}

pub fn write_cache_atomic(path: &Path, cache: &ConsoleCache) -> Result<(), StorageError> {
    write_json_atomic(path, &CacheDocument::from(cache))
}

/// Lenient credential store read
pub fn read_credentials(path: &Path) -> CredentialStore {
    match load_json::<CredentialStore>(path) {
        Ok(store) => store,
        Err(StorageError::FileNotFound(_)) => CredentialStore::default(),
        Err(e) => {
            tracing::warn!("Failed to read credential store: {}; starting empty", e);
            CredentialStore::default()
        }
    }
}

pub fn write_credentials_atomic(path: &Path, store: &CredentialStore) -> Result<(), StorageError> {
    write_json_atomic(path, store)
}
