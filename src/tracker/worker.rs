//! Background state tracker thread
//!
//! One OS thread re-probes known consoles with the lightweight state
//! check and writes the results back through the registry. Callers talk
//! to it through a cloneable [`TrackerHandle`]: pause/resume around
//! session setup, immediate checks after a wake, and statistics.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::clock::SharedClock;
use crate::console::{parse_ipv4, ConsoleRecord, DiscoveryState};
use crate::discovery::SharedProbeTransport;
use crate::error::{Result, SessionError};
use crate::registry::ConsoleRegistry;
use crate::tracker::policy::{self, Decision, Observation, TrackerConfig};

/// Counters readable while the tracker runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub cycles: u64,
    pub probes: u64,
    pub state_changes: u64,
    pub failures: u64,
    pub saves: u64,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    probes: AtomicU64,
    state_changes: AtomicU64,
    failures: AtomicU64,
    saves: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TrackerStats {
        TrackerStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            state_changes: self.state_changes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    /// Live configuration
    config: Mutex<TrackerConfig>,

    /// Cleared by `stop`
    running: AtomicBool,

    /// Outstanding pause requests
    pauses: AtomicUsize,

    /// Single pending immediate-check slot, addressed by IP
    immediate: Mutex<Option<String>>,

    /// Rotating start position for cycle scans
    cursor: AtomicUsize,

    stats: Counters,

    /// Interrupts the inter-cycle sleep
    nudge: Sender<()>,
}

/// Cloneable control surface for a running tracker
#[derive(Clone)]
pub struct TrackerHandle {
    shared: Arc<Shared>,
}

impl TrackerHandle {
    pub fn pause(&self) {
        let prev = self.shared.pauses.fetch_add(1, Ordering::SeqCst);
        if prev == 0 {
            tracing::debug!("State tracker paused");
        }
    }

    pub fn resume(&self) {
        let prev = self
            .shared
            .pauses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if prev == 1 {
            tracing::debug!("State tracker resumed");
            let _ = self.shared.nudge.try_send(());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pauses.load(Ordering::SeqCst) > 0
    }

    /// Pause until the returned guard is dropped
    pub fn pause_guard(&self) -> PauseGuard {
        self.pause();
        PauseGuard {
            handle: self.clone(),
        }
    }

    /// Ask for one console to be checked ahead of the regular cycle
    ///
    /// There is a single slot; a newer request replaces an unserved one.
    pub fn request_check(&self, ip: &str) -> Result<()> {
        parse_ipv4(ip)?;
        *self.shared.immediate.lock() = Some(ip.to_string());
        let _ = self.shared.nudge.try_send(());
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.config.lock().enabled = enabled;
        let _ = self.shared.nudge.try_send(());
    }

    pub fn config(&self) -> TrackerConfig {
        self.shared.config.lock().clone()
    }

    pub fn stats(&self) -> TrackerStats {
        self.shared.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

/// Resumes the tracker on drop
pub struct PauseGuard {
    handle: TrackerHandle,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.handle.resume();
    }
}

/// Owner of the tracker thread
pub struct StateTracker {
    handle: TrackerHandle,
    thread: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl StateTracker {
    /// Spawn the tracker; it starts with a burst over every known console
    pub fn start(
        registry: Arc<ConsoleRegistry>,
        transport: SharedProbeTransport,
        clock: SharedClock,
        config: TrackerConfig,
    ) -> Result<Self> {
        let (nudge_tx, nudge_rx) = bounded(1);
        let (done_tx, done_rx) = unbounded();
        let shared = Arc::new(Shared {
            config: Mutex::new(config),
            running: AtomicBool::new(true),
            pauses: AtomicUsize::new(0),
            immediate: Mutex::new(None),
            cursor: AtomicUsize::new(0),
            stats: Counters::default(),
            nudge: nudge_tx,
        });

        let worker = Worker {
            shared: shared.clone(),
            registry,
            transport,
            clock,
            nudge: nudge_rx,
        };
        let thread = thread::Builder::new()
            .name("rp-state-tracker".into())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        tracing::info!("State tracker started");
        Ok(Self {
            handle: TrackerHandle { shared },
            thread: Some(thread),
            done_rx,
        })
    }

    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> TrackerStats {
        self.handle.stats()
    }

    /// Cooperative stop with a bounded wait
    ///
    /// A thread stuck in a probe past the timeout is logged and detached.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.shared.running.store(false, Ordering::SeqCst);
        let _ = self.handle.shared.nudge.try_send(());

        let limit_ms = self.handle.shared.config.lock().stop_timeout_ms;
        match self.done_rx.recv_timeout(Duration::from_millis(limit_ms)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                tracing::info!("State tracker stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("State tracker did not stop within {} ms; detaching thread", limit_ms);
            }
        }
    }
}

impl Drop for StateTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    shared: Arc<Shared>,
    registry: Arc<ConsoleRegistry>,
    transport: SharedProbeTransport,
    clock: SharedClock,
    nudge: Receiver<()>,
}

impl Worker {
    fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn active(&self) -> bool {
        self.running() && self.shared.pauses.load(Ordering::SeqCst) == 0 && self.shared.config.lock().enabled
    }

    /// Sleep that returns early on pause/resume, check requests and stop
    fn idle(&self, ms: u64) {
        let _ = self.nudge.recv_timeout(Duration::from_millis(ms));
    }

    fn run(&self) {
        self.startup_burst();
        while self.running() {
            let sleep_ms = self.shared.config.lock().sleep_ms;
            if !self.active() {
                self.idle(sleep_ms);
                continue;
            }

            let pending = self.shared.immediate.lock().take();
            match pending {
                Some(ip) => self.serve_immediate(&ip),
                None => self.run_cycle(),
            }
            self.idle(sleep_ms);
        }
    }

    fn startup_burst(&self) {
        let consoles = match self.registry.consoles() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Tracker startup burst skipped: {}", e);
                return;
            }
        };
        tracing::debug!("Tracker startup burst over {} console(s)", consoles.len());
        let stagger = self.shared.config.lock().stagger_ms;
        for (i, record) in consoles.iter().enumerate() {
            if !self.active() {
                return;
            }
            if i > 0 {
                self.clock.sleep(Duration::from_millis(stagger));
            }
            self.check(record);
        }
    }

    fn serve_immediate(&self, ip: &str) {
        match self.registry.find_by_ip(ip) {
            Ok(record) => self.check(&record),
            Err(e) => tracing::debug!(ip = %ip, "Immediate check dropped: {}", e),
        }
    }

    fn run_cycle(&self) {
        let consoles = match self.registry.consoles() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Tracker cycle skipped: {}", e);
                return;
            }
        };
        self.shared.stats.cycles.fetch_add(1, Ordering::Relaxed);
        if consoles.is_empty() {
            return;
        }

        let config = self.shared.config.lock().clone();
        let n = consoles.len();
        let start = self.shared.cursor.load(Ordering::Relaxed) % n;
        let mut checked = 0;
        let mut next = start;

        for offset in 0..n {
            if checked >= config.max_consoles_per_cycle || !self.active() {
                break;
            }
            let idx = (start + offset) % n;
            next = (idx + 1) % n;
            let record = &consoles[idx];
            if !policy::is_due(record, self.clock.now_ms(), &config) {
                continue;
            }
            if checked > 0 {
                self.clock.sleep(Duration::from_millis(config.stagger_ms));
            }
            self.check(record);
            checked += 1;
        }
        self.shared.cursor.store(next, Ordering::Relaxed);
    }

    fn check(&self, record: &ConsoleRecord) {
        let addr = match parse_ipv4(&record.ip) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!(host_id = %record.host_id, "Skipping console: {}", e);
                return;
            }
        };
        let timeout = Duration::from_millis(self.shared.config.lock().probe_timeout_ms);

        self.shared.stats.probes.fetch_add(1, Ordering::Relaxed);
        let observation = match self.transport.lightweight_state(addr, record.kind, timeout) {
            Ok(state) => Observation::Answered(state),
            Err(e) => {
                self.shared.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(ip = %record.ip, "State check failed: {}", e);
                Observation::Failed
            }
        };

        let now = self.clock.now_ms();
        let decision = policy::decide(record, observation, now);
        let result = match decision {
            Decision::Keep => return,
            Decision::Touch => self.registry.modify(&record.host_id, |r| {
                r.last_seen_ms = r.last_seen_ms.max(now);
                false
            }),
            Decision::Apply(state) => self.persist_state(record, state, now, true),
            Decision::Expire => self.persist_state(record, DiscoveryState::Unknown, now, false),
        };
        if let Err(e) = result {
            tracing::warn!(host_id = %record.host_id, "Tracker update failed: {}", e);
        }
    }

    fn persist_state(&self, record: &ConsoleRecord, state: DiscoveryState, now: u64, seen: bool) -> Result<bool> {
        let saved = self.registry.modify(&record.host_id, |r| {
            if r.discovery_state != state {
                r.state_changed_ms = now;
            }
            r.discovery_state = state;
            if seen {
                r.last_seen_ms = r.last_seen_ms.max(now);
            }
            true
        })?;
        self.shared.stats.state_changes.fetch_add(1, Ordering::Relaxed);
        self.shared.stats.saves.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            host_id = %record.host_id,
            ip = %record.ip,
            from = %record.discovery_state,
            to = %state,
            "Console state changed"
        );
        Ok(saved)
    }
}
