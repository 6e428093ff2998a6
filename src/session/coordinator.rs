//! "Start streaming to this console"
//!
//! The coordinator checks preconditions against the registry, wakes the
//! console if needed and polls until it reports ready, then runs the
//! session-init handshake. The background tracker is paused for the
//! whole wake and init phase and resumes when the call returns.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::SharedClock;
use crate::console::{parse_ipv4, ConsoleProbe, ConsoleRecord, DiscoveryState, PsnAccountId};
use crate::constants::{DEFAULT_PROBE_TIMEOUT_MS, PIN_LENGTH};
use crate::discovery::{SharedProbeTransport, SharedWakeTransport, WakeEmitter};
use crate::error::{Error, ErrorKind, NetworkError, Result, SessionError, SessionInitFailure, WakeFailure};
use crate::registry::ConsoleRegistry;
use crate::session::machine::{ActionRequest, SessionConfig, SessionMachine, Transition};
use crate::session::state::{SessionEvent, SessionState};
use crate::session::transport::{MediaSink, Registrar, SessionHandle, SessionInitiator};
use crate::storage::Credential;
use crate::tracker::TrackerHandle;

type TransitionObserver = Arc<dyn Fn(&Transition) + Send + Sync>;
type ActionObserver = Arc<dyn Fn(&ActionRequest) + Send + Sync>;

/// Shared handle to the machine of the current connection attempt
pub type ActiveSession = Arc<Mutex<SessionMachine>>;

enum WaitOutcome {
    Ready,
    TimedOut(WakeFailure),
    Cancelled,
}

/// Validate a registration PIN: exactly eight ASCII digits
pub fn validate_pin(pin: &str) -> std::result::Result<(), SessionError> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(SessionError::InvalidPin(format!("expected {} digits", PIN_LENGTH)))
    }
}

pub struct SessionCoordinator {
    registry: Arc<ConsoleRegistry>,
    probe: SharedProbeTransport,
    wake: WakeEmitter,
    registrar: Arc<dyn Registrar>,
    initiator: Arc<dyn SessionInitiator>,
    media: Option<Arc<dyn MediaSink>>,
    tracker: Option<TrackerHandle>,
    clock: SharedClock,
    config: SessionConfig,
    probe_timeout: Duration,
    psn_id: Mutex<Option<PsnAccountId>>,

    /// Set by `cancel_session`, cleared when a new attempt starts
    cancelled: AtomicBool,

    active: Mutex<Option<ActiveSession>>,
    transition_observers: Mutex<Vec<TransitionObserver>>,
    action_observers: Mutex<Vec<ActionObserver>>,
}

impl SessionCoordinator {
    pub fn new(
        registry: Arc<ConsoleRegistry>,
        probe: SharedProbeTransport,
        wake: SharedWakeTransport,
        registrar: Arc<dyn Registrar>,
        initiator: Arc<dyn SessionInitiator>,
        clock: SharedClock,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            wake: WakeEmitter::new(wake),
            registrar,
            initiator,
            media: None,
            tracker: None,
            clock,
            config,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            psn_id: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            active: Mutex::new(None),
            transition_observers: Mutex::new(Vec::new()),
            action_observers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tracker(mut self, tracker: TrackerHandle) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_media_sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.media = Some(sink);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_psn_account(self, psn_id: PsnAccountId) -> Self {
        self.set_psn_account(Some(psn_id));
        self
    }

    pub fn set_psn_account(&self, psn_id: Option<PsnAccountId>) {
        *self.psn_id.lock() = psn_id;
    }

    pub fn psn_account(&self) -> Option<PsnAccountId> {
        *self.psn_id.lock()
    }

    /// Observe transitions of every future session
    ///
    /// Observers run with the session locked and must not call back
    /// into the coordinator.
    pub fn on_transition<F>(&self, f: F)
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.transition_observers.lock().push(Arc::new(f));
    }

    /// Observe action requests of every future session
    pub fn on_action_required<F>(&self, f: F)
    where
        F: Fn(&ActionRequest) + Send + Sync + 'static,
    {
        self.action_observers.lock().push(Arc::new(f));
    }

    pub fn active_session(&self) -> Option<ActiveSession> {
        self.active.lock().clone()
    }

    pub fn active_state(&self) -> Option<SessionState> {
        self.active_session().map(|m| m.lock().state())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn new_machine(&self) -> ActiveSession {
        let mut machine = SessionMachine::new(self.config.clone(), self.clock.clone());
        for observer in self.transition_observers.lock().iter() {
            let observer = observer.clone();
            machine.on_state_changed(move |t| observer(t));
        }
        for observer in self.action_observers.lock().iter() {
            let observer = observer.clone();
            machine.on_action_required(move |a| observer(a));
        }
        Arc::new(Mutex::new(machine))
    }

    // ── Streaming ────────────────────────────────────────────────

    /// Run a full connection attempt to the console at `ip`
    ///
    /// Blocks through the wake and session-init phases. On success the
    /// session is in `STREAMING` and has been handed to the media sink.
    pub fn start_streaming(&self, ip: &str) -> Result<SessionHandle> {
        let addr = parse_ipv4(ip)?;
        self.cancelled.store(false, Ordering::SeqCst);

        let record = self.registry.find_by_ip(ip)?;
        let credential = self.registry.require_credential(ip)?;
        let psn_id = self.psn_account().ok_or(SessionError::PsnNotConfigured)?;

        let machine = self.new_machine();
        *self.active.lock() = Some(machine.clone());
        tracing::info!(
            session = %machine.lock().id(),
            ip = %ip,
            psn = %psn_id,
            state = %record.discovery_state,
            "Starting session"
        );

        let _pause = self.tracker.as_ref().map(TrackerHandle::pause_guard);
        let result = self.drive(&machine, addr, &record, &credential);

        match &result {
            Ok(_) => {}
            Err(Error::Session(SessionError::Cancelled)) => {
                *self.active.lock() = None;
            }
            Err(e) => {
                let mut m = machine.lock();
                if !m.is_terminal() && m.state() != SessionState::Idle {
                    let _ = m.handle(SessionEvent::Error, &e.to_string());
                }
                drop(m);
                *self.active.lock() = None;
                tracing::warn!(ip = %ip, "Session failed: {}", e);
            }
        }
        result
    }

    fn step(&self, machine: &ActiveSession, event: SessionEvent, reason: &str) -> Result<SessionState> {
        if self.is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }
        Ok(machine.lock().handle(event, reason)?)
    }

    fn drive(
        &self,
        machine: &ActiveSession,
        addr: Ipv4Addr,
        record: &ConsoleRecord,
        credential: &Credential,
    ) -> Result<SessionHandle> {
        let mut probe = ConsoleProbe::new(record.host_id.clone(), record.ip.clone(), record.kind, record.discovery_state);
        probe.device_name = record.device_name.clone();
        probe.firmware_version = record.firmware_version;
        machine.lock().set_console(probe);

        self.step(machine, SessionEvent::StartDiscovery, "start streaming")?;
        let found = match record.discovery_state {
            DiscoveryState::Ready => SessionEvent::ConsoleFoundReady,
            DiscoveryState::Standby | DiscoveryState::Unknown => SessionEvent::ConsoleFoundStandby,
        };
        let state = self.step(machine, found, &format!("console reported {}", record.discovery_state))?;

        match state {
            SessionState::DiscoveredStandby => {
                self.step(machine, SessionEvent::WakeRequest, "console asleep")?;
                self.wake_phase(machine, addr, record, credential)?;
            }
            SessionState::Waking => self.wake_phase(machine, addr, record, credential)?,
            _ => {}
        }

        self.init_phase(machine, addr, record, credential)
    }

    fn wake_phase(
        &self,
        machine: &ActiveSession,
        addr: Ipv4Addr,
        record: &ConsoleRecord,
        credential: &Credential,
    ) -> Result<()> {
        loop {
            let failure = match self.wake.send(credential, &record.ip, record.kind) {
                Ok(()) => match self.await_ready(machine, addr, record)? {
                    WaitOutcome::Ready => {
                        self.step(machine, SessionEvent::WakeSuccess, "console is ready")?;
                        self.mark_ready(record);
                        return Ok(());
                    }
                    WaitOutcome::Cancelled => return Err(SessionError::Cancelled.into()),
                    WaitOutcome::TimedOut(failure) => {
                        let mut m = machine.lock();
                        if m.state() == SessionState::Waking {
                            m.update()?;
                        }
                        failure
                    }
                },
                Err(e) if e.kind() == ErrorKind::NotRegistered => {
                    return Err(SessionError::WakeFailed(WakeFailure::NotRegistered).into());
                }
                Err(e) => {
                    tracing::warn!(ip = %record.ip, "Wake send failed: {}", e);
                    self.step(machine, SessionEvent::WakeFailed, &e.to_string())?;
                    WakeFailure::NetworkError
                }
            };

            let wait_ms = {
                let m = machine.lock();
                m.next_retry_ms().saturating_sub(self.clock.now_ms())
            };
            if wait_ms > 0 {
                self.clock.sleep(Duration::from_millis(wait_ms));
            }
            let state = self.step(machine, SessionEvent::WakeRequest, "retry wake")?;
            if state != SessionState::Waking {
                return Err(SessionError::WakeFailed(failure).into());
            }
        }
    }

    /// Poll the lightweight state check until READY, timeout or cancel
    fn await_ready(&self, machine: &ActiveSession, addr: Ipv4Addr, record: &ConsoleRecord) -> Result<WaitOutcome> {
        let interval = self.config.wake_poll_interval_ms.max(1);
        let mut last = WakeFailure::Unreachable;
        loop {
            if self.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
            match self.probe.lightweight_state(addr, record.kind, self.probe_timeout) {
                Ok(DiscoveryState::Ready) => return Ok(WaitOutcome::Ready),
                Ok(DiscoveryState::Standby) => last = WakeFailure::StillStandby,
                Ok(DiscoveryState::Unknown) | Err(NetworkError::Timeout) => {
                    if last != WakeFailure::StillStandby {
                        last = WakeFailure::Unreachable;
                    }
                }
                Err(e) => {
                    tracing::debug!(ip = %record.ip, "State check failed while waking: {}", e);
                    last = WakeFailure::NetworkError;
                }
            }

            // `None` means the wake phase has no deadline: poll until ready or cancelled
            let remaining = machine.lock().time_remaining_ms();
            if remaining == Some(0) {
                return Ok(WaitOutcome::TimedOut(last));
            }
            let nap = remaining.map_or(interval, |left| interval.min(left));
            self.clock.sleep(Duration::from_millis(nap));
            if machine.lock().time_remaining_ms() == Some(0) {
                return Ok(WaitOutcome::TimedOut(last));
            }
        }
    }

    fn mark_ready(&self, record: &ConsoleRecord) {
        let now = self.clock.now_ms();
        let result = self.registry.modify(&record.host_id, |r| {
            if r.discovery_state != DiscoveryState::Ready {
                r.discovery_state = DiscoveryState::Ready;
                r.state_changed_ms = now;
            }
            r.last_seen_ms = r.last_seen_ms.max(now);
            true
        });
        if let Err(e) = result {
            tracing::warn!(host_id = %record.host_id, "Could not record wake: {}", e);
        }
    }

    fn init_phase(
        &self,
        machine: &ActiveSession,
        addr: Ipv4Addr,
        record: &ConsoleRecord,
        credential: &Credential,
    ) -> Result<SessionHandle> {
        self.step(machine, SessionEvent::SessionInitStart, "starting session")?;

        let outcome = self
            .initiator
            .init(credential, addr, record.kind, record.firmware_version);
        if self.is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }

        let mut m = machine.lock();
        if m.update()?.is_some() {
            return Err(SessionError::InitFailed {
                kind: SessionInitFailure::Timeout,
                message: "session init exceeded its timeout".into(),
            }
            .into());
        }

        match outcome {
            Ok(handle) => {
                m.handle(SessionEvent::SessionInitSuccess, "session established")?;
                drop(m);
                if let Err(e) = self.registry.record_connection(&record.ip) {
                    tracing::warn!(ip = %record.ip, "Could not record connection: {}", e);
                }
                if let Some(media) = &self.media {
                    media.attach(handle.clone());
                }
                tracing::info!(ip = %record.ip, session = %handle.session_id, "Streaming");
                Ok(handle)
            }
            Err(e) => {
                m.handle(SessionEvent::SessionInitFailed, &e.message)?;
                Err(SessionError::InitFailed {
                    kind: e.kind,
                    message: e.message,
                }
                .into())
            }
        }
    }

    // ── Other operations ─────────────────────────────────────────

    /// Abort the current attempt; the session returns to `IDLE`
    pub fn cancel_session(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(machine) = self.active_session() {
            let mut m = machine.lock();
            if let Err(e) = m.handle(SessionEvent::Reset, "cancelled by user") {
                tracing::debug!("Cancel ignored: {}", e);
            }
        }
        tracing::info!("Session cancelled");
    }

    /// End a streaming session at the user's request
    pub fn disconnect(&self) -> Result<()> {
        let machine = self.active_session().ok_or(SessionError::NotConnected)?;
        let mut m = machine.lock();
        if m.state() != SessionState::Streaming {
            return Err(SessionError::NotConnected.into());
        }
        m.handle(SessionEvent::UserDisconnect, "user disconnect")?;
        drop(m);
        *self.active.lock() = None;
        Ok(())
    }

    /// Send one wake datagram without waiting for the console
    pub fn wake_only(&self, ip: &str) -> Result<()> {
        self.wake.wake(&self.registry, ip)?;
        if let Some(tracker) = &self.tracker {
            tracker.request_check(ip)?;
        }
        Ok(())
    }

    /// Pair with a console using its on-screen PIN
    pub fn register(&self, ip: &str, pin: &str, psn_id: Option<PsnAccountId>) -> Result<Credential> {
        validate_pin(pin)?;
        let addr = parse_ipv4(ip)?;
        let psn_id = psn_id
            .or_else(|| self.psn_account())
            .ok_or(SessionError::PsnNotConfigured)?;

        tracing::info!(ip = %ip, "Registering console");
        let mut credential = self.registrar.register(addr, pin, psn_id).map_err(|e| {
            tracing::warn!(ip = %ip, "Registration failed: {}", e);
            e
        })?;
        if credential.created_ms == 0 {
            credential.created_ms = self.clock.now_ms();
        }
        self.registry.store_credential(ip, credential.clone())?;
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_must_be_eight_digits() {
        assert!(validate_pin("12345678").is_ok());
        assert!(validate_pin("1234567").is_err());
        assert!(validate_pin("1234567a").is_err());
        assert!(validate_pin("123456789").is_err());
        assert!(validate_pin("１２３４５６７８").is_err());
    }
}
