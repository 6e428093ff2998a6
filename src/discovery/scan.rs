//! Discovery scans and lightweight state checks

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;

use crate::clock::SharedClock;
use crate::console::{parse_ipv4, ConsoleKind, ConsoleProbe, DiscoveryState, PsnAccountId};
use crate::discovery::transport::SharedProbeTransport;
use crate::error::{NetworkError, Result};
use crate::registry::{ConsoleRegistry, ProbeOutcome};

/// Extra time allowed for the transport to report completion
const COMPLETION_GRACE: Duration = Duration::from_secs(1);

/// One console seen during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub probe: ConsoleProbe,
    pub last_seen_ms: u64,
}

/// Results of one scan, deduplicated by host id in first-sighting order
#[derive(Debug, Default)]
pub struct ScanResults {
    entries: Vec<ScanEntry>,
}

impl ScanResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response; returns true on first sighting
    pub fn record(&mut self, probe: ConsoleProbe, now_ms: u64) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.probe.host_id == probe.host_id) {
            existing.probe.state = probe.state;
            if !probe.device_name.is_empty() {
                existing.probe.device_name = probe.device_name;
            }
            if probe.firmware_version != 0 {
                existing.probe.firmware_version = probe.firmware_version;
            }
            existing.last_seen_ms = existing.last_seen_ms.max(now_ms);
            return false;
        }
        self.entries.push(ScanEntry {
            probe,
            last_seen_ms: now_ms,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    pub fn probes(&self) -> Vec<ConsoleProbe> {
        self.entries.iter().map(|e| e.probe.clone()).collect()
    }
}

/// Summary of a scan merged into the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub found: usize,
    pub added: usize,
    pub updated: usize,
    pub rejected: usize,
}

/// Drives a probe transport
pub struct Discovery {
    transport: SharedProbeTransport,
    clock: SharedClock,
}

impl Discovery {
    pub fn new(transport: SharedProbeTransport, clock: SharedClock) -> Self {
        Self { transport, clock }
    }

    pub fn transport(&self) -> &SharedProbeTransport {
        &self.transport
    }

    /// Start a scan without blocking
    ///
    /// `on_console` sees every response in arrival order; `on_complete`
    /// receives the deduplicated result set.
    pub fn start_scan<C, D>(
        &self,
        psn_id: Option<PsnAccountId>,
        timeout: Duration,
        on_console: C,
        on_complete: D,
    ) -> Result<()>
    where
        C: Fn(&ConsoleProbe) + Send + Sync + 'static,
        D: FnOnce(Vec<ScanEntry>) + Send + 'static,
    {
        let results = Arc::new(Mutex::new(ScanResults::new()));
        let clock = self.clock.clone();

        let sink = results.clone();
        let per_console: crate::discovery::transport::ConsoleCallback = Arc::new(move |probe: ConsoleProbe| {
            let first = sink.lock().record(probe.clone(), clock.now_ms());
            if first {
                tracing::debug!(host_id = %probe.host_id, ip = %probe.ip, state = %probe.state, "Console discovered");
            }
            on_console(&probe);
        });

        let complete = Box::new(move || {
            let entries = std::mem::take(&mut results.lock().entries);
            tracing::info!("Discovery scan complete: {} console(s)", entries.len());
            on_complete(entries);
        });

        tracing::debug!(psn = ?psn_id, timeout_ms = timeout.as_millis() as u64, "Starting discovery scan");
        self.transport.start(psn_id, per_console, complete, timeout)?;
        Ok(())
    }

    /// Scan and wait for the result set
    pub fn scan(&self, psn_id: Option<PsnAccountId>, timeout: Duration) -> Result<Vec<ScanEntry>> {
        let (tx, rx) = bounded(1);
        self.start_scan(psn_id, timeout, |_| {}, move |entries| {
            let _ = tx.send(entries);
        })?;
        rx.recv_timeout(timeout + COMPLETION_GRACE)
            .map_err(|_| NetworkError::Timeout.into())
    }

    /// Scan and write every result through to the registry
    pub fn scan_into(
        &self,
        registry: &ConsoleRegistry,
        psn_id: Option<PsnAccountId>,
        timeout: Duration,
    ) -> Result<ScanSummary> {
        let entries = self.scan(psn_id, timeout)?;
        let mut summary = ScanSummary {
            found: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match registry.apply_probe(&entry.probe) {
                Ok(ProbeOutcome::Added) => summary.added += 1,
                Ok(ProbeOutcome::Updated) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!(host_id = %entry.probe.host_id, "Discovery result not stored: {}", e);
                    summary.rejected += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Lightweight single-console state check
    pub fn check_state(&self, ip: &str, kind: ConsoleKind, timeout: Duration) -> Result<DiscoveryState> {
        let addr = parse_ipv4(ip)?;
        Ok(self.transport.lightweight_state(addr, kind, timeout)?)
    }
}
