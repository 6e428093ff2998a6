//! Bounded, ordered console cache
//!
//! Holds at most [`MAX_CONSOLES`] records in insertion order. The cache
//! itself is plain data; locking and persistence live in the registry.

use crate::console::{validate_host_id, ConsoleProbe, ConsoleRecord};
use crate::constants::{CACHE_SCHEMA_VERSION, MAX_CONSOLES};
use crate::error::{RegistryError, StorageError};

/// In-memory console cache
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleCache {
    consoles: Vec<ConsoleRecord>,
    /// Schema version the cache was read with
    pub schema_version: u32,
    /// Last time the cache was mutated or saved
    pub last_updated_ms: u64,
    /// Outcome of the last validation pass
    pub valid: bool,
}

/// What a validation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub dropped_invalid: usize,
    pub dropped_duplicates: usize,
    pub registrations_cleared: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_invalid == 0
            && self.dropped_duplicates == 0
            && self.registrations_cleared.is_empty()
    }
}

impl Default for ConsoleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleCache {
    /// Empty, valid cache at the current schema version
    pub fn new() -> Self {
        Self {
            consoles: Vec::with_capacity(MAX_CONSOLES),
            schema_version: CACHE_SCHEMA_VERSION,
            last_updated_ms: 0,
            valid: true,
        }
    }

    /// Build a cache from decoded records, clamping to capacity
    pub fn from_records(mut consoles: Vec<ConsoleRecord>, schema_version: u32, last_updated_ms: u64) -> Self {
        consoles.truncate(MAX_CONSOLES);
        Self {
            consoles,
            schema_version,
            last_updated_ms,
            valid: false,
        }
    }

    pub fn consoles(&self) -> &[ConsoleRecord] {
        &self.consoles
    }

    pub fn console_count(&self) -> usize {
        self.consoles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consoles.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.consoles.len() >= MAX_CONSOLES
    }

    /// Append a record for a newly discovered console
    pub fn add(&mut self, probe: &ConsoleProbe, now_ms: u64) -> Result<&ConsoleRecord, RegistryError> {
        validate_host_id(&probe.host_id)?;
        if probe.ip.is_empty() {
            return Err(RegistryError::InvalidParam("empty IP address".into()));
        }
        if self.find(&probe.host_id).is_some() {
            return Err(RegistryError::ConsoleExists(probe.host_id.clone()));
        }
        if self.is_full() {
            return Err(RegistryError::CacheFull(MAX_CONSOLES));
        }

        self.consoles.push(ConsoleRecord::from_probe(probe, now_ms));
        self.last_updated_ms = now_ms;
        Ok(&self.consoles[self.consoles.len() - 1])
    }

    /// Remove a console by host id, shifting the tail down
    pub fn remove(&mut self, host_id: &str) -> Result<ConsoleRecord, RegistryError> {
        let pos = self
            .position(host_id)
            .ok_or_else(|| RegistryError::NotFound(host_id.to_string()))?;
        Ok(self.consoles.remove(pos))
    }

    pub fn find(&self, host_id: &str) -> Option<&ConsoleRecord> {
        self.consoles.iter().find(|c| c.host_id == host_id)
    }

    pub fn find_mut(&mut self, host_id: &str) -> Option<&mut ConsoleRecord> {
        self.consoles.iter_mut().find(|c| c.host_id == host_id)
    }

    pub fn find_by_ip(&self, ip: &str) -> Option<&ConsoleRecord> {
        self.consoles.iter().find(|c| c.ip == ip)
    }

    pub fn find_by_ip_mut(&mut self, ip: &str) -> Option<&mut ConsoleRecord> {
        self.consoles.iter_mut().find(|c| c.ip == ip)
    }

    fn position(&self, host_id: &str) -> Option<usize> {
        self.consoles.iter().position(|c| c.host_id == host_id)
    }

    /// Remove records matching `pred`, keeping order stable
    ///
    /// The index only advances when nothing was removed at it, so the
    /// shifted-down tail is always visited.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<ConsoleRecord>
    where
        F: FnMut(&ConsoleRecord) -> bool,
    {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.consoles.len() {
            if pred(&self.consoles[i]) {
                removed.push(self.consoles.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConsoleRecord> {
        self.consoles.iter_mut()
    }

    /// Normalize the cache and repair split-brain registration flags
    ///
    /// `is_registered` answers for an IP from the credential store. Records
    /// with an empty host id or IP and duplicate host ids are dropped; the
    /// registered flag of every PS5-family record is forced to agree with
    /// the credential store.
    pub fn validate<F>(&mut self, is_registered: F) -> Result<ValidationReport, StorageError>
    where
        F: Fn(&str) -> bool,
    {
        if self.schema_version != CACHE_SCHEMA_VERSION {
            self.valid = false;
            return Err(StorageError::InvalidData(format!(
                "schema version {} (expected {})",
                self.schema_version, CACHE_SCHEMA_VERSION
            )));
        }
        if self.consoles.len() > MAX_CONSOLES {
            self.valid = false;
            return Err(StorageError::InvalidData(format!(
                "{} consoles exceeds capacity {}",
                self.consoles.len(),
                MAX_CONSOLES
            )));
        }

        let mut report = ValidationReport::default();

        let before = self.consoles.len();
        self.consoles
            .retain(|c| !c.is_empty_slot() && validate_host_id(&c.host_id).is_ok());
        report.dropped_invalid = before - self.consoles.len();

        let mut seen = std::collections::HashSet::new();
        let before = self.consoles.len();
        self.consoles.retain(|c| seen.insert(c.host_id.clone()));
        report.dropped_duplicates = before - self.consoles.len();

        for record in self.consoles.iter_mut() {
            record.signal_strength = record.signal_strength.clamp(0.0, 1.0);
            if record.kind.is_ps5_family() && record.is_registered && !is_registered(&record.ip) {
                tracing::warn!(
                    ip = %record.ip,
                    host_id = %record.host_id,
                    "Cached registration has no valid credential; clearing flag"
                );
                record.is_registered = false;
                report.registrations_cleared.push(record.ip.clone());
            }
        }

        self.valid = true;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ConsoleKind, DiscoveryState};

    fn probe(n: usize) -> ConsoleProbe {
        ConsoleProbe::new(
            format!("HID{}", n),
            format!("192.168.1.{}", n + 10),
            ConsoleKind::Ps5,
            DiscoveryState::Ready,
        )
    }

    #[test]
    fn add_rejects_duplicates_and_overflow() {
        let mut cache = ConsoleCache::new();
        for n in 0..MAX_CONSOLES {
            cache.add(&probe(n), 1).unwrap();
        }
        assert_eq!(cache.add(&probe(0), 2).unwrap_err(), RegistryError::ConsoleExists("HID0".into()));
        let snapshot = cache.clone();
        assert_eq!(cache.add(&probe(99), 2).unwrap_err(), RegistryError::CacheFull(MAX_CONSOLES));
        assert_eq!(cache, snapshot);
    }

    #[test]
    fn remove_shifts_tail() {
        let mut cache = ConsoleCache::new();
        for n in 0..3 {
            cache.add(&probe(n), 1).unwrap();
        }
        cache.remove("HID1").unwrap();
        let ids: Vec<_> = cache.consoles().iter().map(|c| c.host_id.as_str()).collect();
        assert_eq!(ids, ["HID0", "HID2"]);
        assert_eq!(cache.remove("HID1").unwrap_err(), RegistryError::NotFound("HID1".into()));
    }

    #[test]
    fn remove_where_visits_shifted_entries() {
        let mut cache = ConsoleCache::new();
        for n in 0..4 {
            cache.add(&probe(n), 1).unwrap();
        }
        let removed = cache.remove_where(|c| c.host_id == "HID1" || c.host_id == "HID2");
        assert_eq!(removed.len(), 2);
        assert_eq!(cache.console_count(), 2);
    }

    #[test]
    fn validate_repairs_split_brain() {
        let mut cache = ConsoleCache::new();
        cache.add(&probe(0), 1).unwrap();
        cache.find_mut("HID0").unwrap().is_registered = true;
        let report = cache.validate(|_| false).unwrap();
        assert_eq!(report.registrations_cleared, vec!["192.168.1.10".to_string()]);
        assert!(!cache.find("HID0").unwrap().is_registered);
        assert!(cache.valid);
    }

    #[test]
    fn validate_rejects_version_mismatch() {
        let mut cache = ConsoleCache::from_records(Vec::new(), 99, 0);
        assert!(matches!(cache.validate(|_| true), Err(StorageError::InvalidData(_))));
        assert!(!cache.valid);
    }

    #[test]
    fn validate_drops_blank_and_duplicate_records() {
        let mut a = ConsoleRecord::from_probe(&probe(0), 1);
        let dup = a.clone();
        let blank = ConsoleRecord::default();
        a.signal_strength = 4.0;
        let mut cache = ConsoleCache::from_records(vec![a, blank, dup], CACHE_SCHEMA_VERSION, 0);
        let report = cache.validate(|_| true).unwrap();
        assert_eq!(report.dropped_invalid, 1);
        assert_eq!(report.dropped_duplicates, 1);
        assert_eq!(cache.console_count(), 1);
        assert_eq!(cache.consoles()[0].signal_strength, 1.0);
    }
}
