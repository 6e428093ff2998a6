//! Console registry
//!
//! The registry owns the console cache and the credential store behind a
//! single mutex and is the only authority on whether a console is
//! registered. Every mutation writes through to disk while the lock is
//! held. The registered predicate is memoized in a concurrent map so the
//! hot path never waits on disk I/O.

pub mod events;

use crossbeam_channel::Receiver;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::clock::SharedClock;
use crate::console::{parse_ipv4, ConsoleProbe, ConsoleRecord};
use crate::error::{Error, RegistryError, Result, StorageError};
use crate::storage::codec;
use crate::storage::{ConsoleCache, Credential, CredentialStore, DataPaths, ValidationReport};

pub use events::{EventBus, RegistrationStatus, RegistryEvent};

/// What `apply_probe` did with a discovery result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Added,
    Updated,
}

struct Inner {
    cache: ConsoleCache,
    credentials: CredentialStore,
    loaded: bool,
}

impl Inner {
    fn empty() -> Self {
        Self {
            cache: ConsoleCache::new(),
            credentials: CredentialStore::default(),
            loaded: false,
        }
    }
}

/// Process-wide console registry handle
pub struct ConsoleRegistry {
    paths: DataPaths,
    clock: SharedClock,
    inner: Mutex<Option<Inner>>,
    registered: DashMap<String, bool>,
    events: EventBus,
}

impl ConsoleRegistry {
    /// Open the registry, creating the data directory if needed
    ///
    /// Failing to create the directory is the one fatal error.
    pub fn open(paths: DataPaths, clock: SharedClock) -> Result<Self> {
        paths.ensure()?;
        tracing::info!("Console registry at {}", paths.dir.display());
        Ok(Self {
            paths,
            clock,
            inner: Mutex::new(Some(Inner::empty())),
            registered: DashMap::new(),
            events: EventBus::new(),
        })
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// Receive registration and presence events
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Flush to disk and refuse further operations
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock();
        if let Some(inner) = guard.as_ref() {
            if inner.loaded {
                if let Err(e) = codec::write_cache_atomic(&self.paths.consoles, &inner.cache) {
                    tracing::warn!("Final cache save failed: {}", e);
                }
            }
        }
        *guard = None;
        self.registered.clear();
        tracing::info!("Console registry shut down");
    }

    // ── Locking helpers ───────────────────────────────────────────

    fn with_inner<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Inner, &mut Vec<RegistryEvent>) -> Result<R>,
    {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.inner.lock();
            let inner = guard.as_mut().ok_or(RegistryError::NotInitialized)?;
            if !inner.loaded {
                self.load_locked(inner);
            }
            f(inner, &mut events)
        };
        self.events.publish(events);
        result
    }

    fn load_locked(&self, inner: &mut Inner) {
        inner.credentials = codec::read_credentials(&self.paths.registrations);
        let mut cache = codec::read_cache(&self.paths.consoles);

        let credentials = &inner.credentials;
        match cache.validate(|ip| credentials.is_registered(ip)) {
            Ok(report) => {
                if !report.is_clean() {
                    tracing::warn!(
                        dropped_invalid = report.dropped_invalid,
                        dropped_duplicates = report.dropped_duplicates,
                        cleared = report.registrations_cleared.len(),
                        "Console cache repaired on load"
                    );
                    self.persist_cache(&cache);
                }
            }
            Err(e) => {
                tracing::warn!("Console cache rejected: {}; starting empty", e);
                self.set_aside(&cache);
                cache = ConsoleCache::new();
            }
        }

        inner.cache = cache;
        inner.loaded = true;
        self.registered.clear();
        tracing::debug!(
            consoles = inner.cache.console_count(),
            registrations = inner.credentials.len(),
            "Registry loaded"
        );
    }

    /// Copy an unreadable cache aside before the next save replaces it
    fn set_aside(&self, rejected: &ConsoleCache) {
        let backup = self.paths.rejected_cache(rejected.schema_version);
        match std::fs::copy(&self.paths.consoles, &backup) {
            Ok(_) => tracing::warn!(backup = %backup.display(), "Kept a copy of the rejected console cache"),
            Err(e) => tracing::warn!("Could not copy rejected console cache to {}: {}", backup.display(), e),
        }
    }

    /// Best-effort cache write; failure is logged and the caller proceeds
    fn persist_cache(&self, cache: &ConsoleCache) -> bool {
        match codec::write_cache_atomic(&self.paths.consoles, cache) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save console cache: {}", e);
                false
            }
        }
    }

    fn persist_credentials(&self, store: &CredentialStore) -> std::result::Result<(), StorageError> {
        codec::write_credentials_atomic(&self.paths.registrations, store)
    }

    // ── Loading / saving ──────────────────────────────────────────

    /// Re-read both files from disk and return the validated cache
    pub fn load(&self) -> Result<ConsoleCache> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(RegistryError::NotInitialized)?;
        self.load_locked(inner);
        Ok(inner.cache.clone())
    }

    /// Persist the cache as it is now
    pub fn save(&self) -> Result<()> {
        let now = self.clock.now_ms();
        self.with_inner(|inner, _| {
            inner.cache.last_updated_ms = now;
            codec::write_cache_atomic(&self.paths.consoles, &inner.cache)?;
            Ok(())
        })
    }

    /// Copy of the cache with registration flags synced to the credential store
    pub fn snapshot(&self) -> Result<ConsoleCache> {
        self.with_inner(|inner, _| {
            let mut cache = inner.cache.clone();
            for record in cache.iter_mut() {
                record.is_registered = inner.credentials.is_registered(&record.ip);
            }
            Ok(cache)
        })
    }

    pub fn consoles(&self) -> Result<Vec<ConsoleRecord>> {
        Ok(self.snapshot()?.consoles().to_vec())
    }

    // ── Core operations ───────────────────────────────────────────

    /// Add a console from a discovery probe
    pub fn add(&self, probe: &ConsoleProbe) -> Result<ConsoleRecord> {
        parse_ipv4(&probe.ip)?;
        let now = self.clock.now_ms();
        let record = self.with_inner(|inner, events| {
            let registered = inner.credentials.is_registered(&probe.ip);
            let record = {
                let added = inner.cache.add(probe, now)?;
                added.clone()
            };
            if let Some(r) = inner.cache.find_mut(&record.host_id) {
                r.is_registered = registered;
            }
            self.persist_cache(&inner.cache);
            self.forget_memo(&record.ip);
            events.push(RegistryEvent::ConsoleAdded {
                host_id: record.host_id.clone(),
                ip: record.ip.clone(),
            });
            Ok(ConsoleRecord {
                is_registered: registered,
                ..record
            })
        })?;
        tracing::info!(host_id = %record.host_id, ip = %record.ip, "Console added");
        Ok(record)
    }

    /// Add a manually entered console
    pub fn add_manual(&self, ip: &str, host_id: &str, kind: crate::console::ConsoleKind) -> Result<ConsoleRecord> {
        let probe = ConsoleProbe::new(host_id, ip, kind, crate::console::DiscoveryState::Unknown);
        self.add(&probe)
    }

    /// Remove a console and cascade to its credential
    pub fn remove(&self, host_id: &str) -> Result<ConsoleRecord> {
        let removed = self.with_inner(|inner, events| {
            let removed = inner.cache.remove(host_id)?;
            self.persist_cache(&inner.cache);

            if inner.credentials.remove(&removed.ip).is_some() {
                if let Err(e) = self.persist_credentials(&inner.credentials) {
                    tracing::warn!("Failed to save credential store: {}", e);
                }
                events.push(RegistryEvent::ConsoleStateChanged {
                    ip: removed.ip.clone(),
                    status: RegistrationStatus::Unregistered,
                });
            }
            self.forget_memo(&removed.ip);
            events.push(RegistryEvent::ConsoleRemoved {
                host_id: removed.host_id.clone(),
                ip: removed.ip.clone(),
            });
            Ok(removed)
        })?;
        tracing::info!(host_id = %removed.host_id, ip = %removed.ip, "Console removed");
        Ok(removed)
    }

    pub fn find(&self, host_id: &str) -> Result<ConsoleRecord> {
        self.with_inner(|inner, _| {
            let mut record = inner
                .cache
                .find(host_id)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(host_id.to_string()))?;
            record.is_registered = inner.credentials.is_registered(&record.ip);
            Ok(record)
        })
    }

    /// Look a console up by IP, loading from disk on first use
    pub fn find_by_ip(&self, ip: &str) -> Result<ConsoleRecord> {
        self.with_inner(|inner, _| {
            let mut record = inner
                .cache
                .find_by_ip(ip)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(ip.to_string()))?;
            record.is_registered = inner.credentials.is_registered(&record.ip);
            Ok(record)
        })
    }

    /// Normalize the cache and repair split-brain flags
    pub fn validate(&self) -> Result<ValidationReport> {
        let report = self.with_inner(|inner, _| {
            let credentials = &inner.credentials;
            let report = inner
                .cache
                .validate(|ip| credentials.is_registered(ip))
                .map_err(Error::from)?;
            if !report.is_clean() {
                self.persist_cache(&inner.cache);
            }
            for ip in &report.registrations_cleared {
                self.forget_memo(ip);
            }
            Ok(report)
        })?;
        Ok(report)
    }

    /// The canonical "is this console registered?" predicate
    ///
    /// Never fails: a missing, corrupt or mock credential, or a registry
    /// that is shut down, all answer `false`.
    pub fn is_registered(&self, ip: &str) -> bool {
        if let Some(hit) = self.registered.get(ip) {
            return *hit;
        }
        // memoize under the registry lock so a concurrent writer's
        // invalidation cannot land between the read and the insert
        self.with_inner(|inner, _| {
            let answer = inner.credentials.is_registered(ip);
            self.registered.insert(ip.to_string(), answer);
            Ok(answer)
        })
        .unwrap_or(false)
    }

    pub fn registration_status(&self, ip: &str) -> RegistrationStatus {
        if self.is_registered(ip) {
            RegistrationStatus::Registered
        } else {
            RegistrationStatus::Unregistered
        }
    }

    /// Drop the memoized registered answer for `ip`
    pub fn invalidate(&self, ip: &str) {
        let _guard = self.inner.lock();
        self.forget_memo(ip);
    }

    /// Caller holds the registry lock
    fn forget_memo(&self, ip: &str) {
        self.registered.remove(ip);
    }

    /// Evict mock credentials and resync registration flags
    ///
    /// Returns the number of console records removed.
    pub fn cleanup_invalid(&self) -> Result<usize> {
        let removed = self.with_inner(|inner, events| {
            let mut mock_ips = Vec::new();
            for record in inner.cache.consoles() {
                if !record.kind.is_ps5_family() {
                    continue;
                }
                if inner.credentials.get(&record.ip).map(Credential::is_mock).unwrap_or(false) {
                    mock_ips.push(record.ip.clone());
                }
            }

            let removed = inner.cache.remove_where(|r| mock_ips.contains(&r.ip));
            for record in &removed {
                inner.credentials.remove(&record.ip);
                tracing::warn!(
                    ip = %record.ip,
                    host_id = %record.host_id,
                    "Evicted console with mock registration"
                );
                events.push(RegistryEvent::ConsoleStateChanged {
                    ip: record.ip.clone(),
                    status: RegistrationStatus::Unregistered,
                });
                events.push(RegistryEvent::ConsoleRemoved {
                    host_id: record.host_id.clone(),
                    ip: record.ip.clone(),
                });
            }

            let credentials = &inner.credentials;
            let mut touched = mock_ips.clone();
            for record in inner.cache.iter_mut() {
                if !record.kind.is_ps5_family() {
                    continue;
                }
                let truth = credentials.is_registered(&record.ip);
                if record.is_registered != truth {
                    record.is_registered = truth;
                    touched.push(record.ip.clone());
                }
            }

            if !removed.is_empty() {
                if let Err(e) = self.persist_credentials(&inner.credentials) {
                    tracing::warn!("Failed to save credential store: {}", e);
                }
            }
            if !touched.is_empty() {
                self.persist_cache(&inner.cache);
            }
            for ip in &touched {
                self.forget_memo(ip);
            }
            Ok(removed.len())
        })?;

        if removed > 0 {
            tracing::info!("Cleanup removed {} console(s)", removed);
        }
        Ok(removed)
    }

    // ── Credentials ───────────────────────────────────────────────

    /// Store the credential produced by a successful registration
    pub fn store_credential(&self, ip: &str, credential: Credential) -> Result<()> {
        parse_ipv4(ip)?;
        if !credential.is_structurally_valid() {
            return Err(RegistryError::RegistrationCorrupted(ip.to_string()).into());
        }
        let usable = credential.is_usable();
        self.with_inner(|inner, events| {
            inner.credentials.insert(ip, credential);
            self.forget_memo(ip);
            self.persist_credentials(&inner.credentials)?;
            if let Some(record) = inner.cache.find_by_ip_mut(ip) {
                record.is_registered = usable;
                self.persist_cache(&inner.cache);
            }
            events.push(RegistryEvent::ConsoleStateChanged {
                ip: ip.to_string(),
                status: if usable {
                    RegistrationStatus::Registered
                } else {
                    RegistrationStatus::Unregistered
                },
            });
            Ok(())
        })?;
        tracing::info!(ip = %ip, "Registration stored");
        Ok(())
    }

    /// Delete the credential for `ip`, keeping the console record
    pub fn forget_credential(&self, ip: &str) -> Result<bool> {
        self.with_inner(|inner, events| {
            let existed = inner.credentials.remove(ip).is_some();
            self.forget_memo(ip);
            if existed {
                self.persist_credentials(&inner.credentials)?;
                if let Some(record) = inner.cache.find_by_ip_mut(ip) {
                    record.is_registered = false;
                    self.persist_cache(&inner.cache);
                }
                events.push(RegistryEvent::ConsoleStateChanged {
                    ip: ip.to_string(),
                    status: RegistrationStatus::Unregistered,
                });
            }
            Ok(existed)
        })
    }

    /// Raw credential lookup, valid or not
    pub fn credential(&self, ip: &str) -> Option<Credential> {
        self.with_inner(|inner, _| Ok(inner.credentials.get(ip).cloned()))
            .ok()
            .flatten()
    }

    /// Usable credential for `ip`, or the reason there is none
    ///
    /// A console whose stored flag claims registration but whose
    /// credential is missing or malformed reports
    /// [`RegistryError::RegistrationCorrupted`], and its flag is cleared.
    pub fn require_credential(&self, ip: &str) -> Result<Credential> {
        self.with_inner(|inner, _| {
            self.forget_memo(ip);
            if let Some(credential) = inner.credentials.get(ip).filter(|c| c.is_usable()) {
                return Ok(credential.clone());
            }
            let claimed = inner
                .cache
                .find_by_ip(ip)
                .map(|r| r.is_registered)
                .unwrap_or(false);
            let damaged = inner
                .credentials
                .get(ip)
                .map(|c| !c.is_structurally_valid())
                .unwrap_or(false);
            if claimed {
                if let Some(record) = inner.cache.find_by_ip_mut(ip) {
                    tracing::warn!(ip = %ip, "Registration flag set without a valid credential; clearing");
                    record.is_registered = false;
                    self.persist_cache(&inner.cache);
                }
            }
            if claimed || damaged {
                Err(RegistryError::RegistrationCorrupted(ip.to_string()).into())
            } else {
                Err(RegistryError::NotRegistered(ip.to_string()).into())
            }
        })
    }

    // ── Discovery and tracker write paths ─────────────────────────

    /// Merge a discovery result: first sighting adds, later ones refresh
    pub fn apply_probe(&self, probe: &ConsoleProbe) -> Result<ProbeOutcome> {
        if self.find(&probe.host_id).is_err() {
            return self.add(probe).map(|_| ProbeOutcome::Added);
        }
        let now = self.clock.now_ms();
        self.with_inner(|inner, events| {
            let record = inner
                .cache
                .find_mut(&probe.host_id)
                .ok_or_else(|| RegistryError::NotFound(probe.host_id.clone()))?;
            let before = record.discovery_state;
            record.refresh_from_probe(probe, now);
            if before != record.discovery_state {
                events.push(RegistryEvent::PresenceChanged {
                    host_id: record.host_id.clone(),
                    ip: record.ip.clone(),
                    state: record.discovery_state,
                });
            }
            inner.cache.last_updated_ms = now;
            self.persist_cache(&inner.cache);
            Ok(ProbeOutcome::Updated)
        })
    }

    /// Mutate one record in place
    ///
    /// `f` returns whether the change must be persisted; the cache is
    /// saved only then. Returns that flag.
    pub fn modify<F>(&self, host_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut ConsoleRecord) -> bool,
    {
        let now = self.clock.now_ms();
        self.with_inner(|inner, events| {
            let record = inner
                .cache
                .find_mut(host_id)
                .ok_or_else(|| RegistryError::NotFound(host_id.to_string()))?;
            let before = record.discovery_state;
            let last_seen = record.last_seen_ms;
            let persist = f(record);
            record.last_seen_ms = record.last_seen_ms.max(last_seen);
            if before != record.discovery_state {
                events.push(RegistryEvent::PresenceChanged {
                    host_id: record.host_id.clone(),
                    ip: record.ip.clone(),
                    state: record.discovery_state,
                });
            }
            if persist {
                inner.cache.last_updated_ms = now;
                self.persist_cache(&inner.cache);
            }
            Ok(persist)
        })
    }

    /// Stamp a successful streaming connection
    pub fn record_connection(&self, ip: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let host_id = self.find_by_ip(ip)?.host_id;
        self.modify(&host_id, |r| {
            r.last_connected_ms = now;
            r.connection_count = r.connection_count.saturating_add(1);
            true
        })?;
        Ok(())
    }

    pub fn set_favorite(&self, host_id: &str, favorite: bool) -> Result<()> {
        self.modify(host_id, |r| {
            r.is_favorite = favorite;
            true
        })?;
        Ok(())
    }

    pub fn rename(&self, host_id: &str, display_name: &str) -> Result<()> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidParam("empty display name".into()).into());
        }
        self.modify(host_id, |r| {
            r.display_name = name.to_string();
            true
        })?;
        Ok(())
    }
}
