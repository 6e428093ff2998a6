//! Fake transports shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use rpconnect::clock::ManualClock;
use rpconnect::console::{ConsoleKind, DiscoveryState, PsnAccountId};
use rpconnect::discovery::{CompleteCallback, ConsoleCallback, ProbeTransport, WakeTransport};
use rpconnect::error::NetworkError;
use rpconnect::registry::ConsoleRegistry;
use rpconnect::session::{
    MediaSink, Registrar, SessionConfig, SessionCoordinator, SessionHandle, SessionInitError, SessionInitiator,
    Transition,
};
use rpconnect::storage::{Credential, DataPaths};
use rpconnect::tracker::{StateTracker, TrackerConfig};

pub const IP: &str = "192.168.1.50";
pub const START_MS: u64 = 1_700_000_000_000;

type PollHook = Arc<dyn Fn() + Send + Sync>;

/// Lightweight state checks answer from a script, then repeat `fallback`
pub struct ScriptedProbe {
    script: Mutex<VecDeque<DiscoveryState>>,
    fallback: DiscoveryState,
    hook: Mutex<Option<PollHook>>,
    pub polls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(script: &[DiscoveryState], fallback: DiscoveryState) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            hook: Mutex::new(None),
            polls: AtomicUsize::new(0),
        })
    }

    /// Run `f` on the polling thread before every answer
    pub fn on_poll<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.hook.lock() = Some(Arc::new(f));
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl ProbeTransport for ScriptedProbe {
    fn start(
        &self,
        _psn_id: Option<PsnAccountId>,
        _on_console: ConsoleCallback,
        on_complete: CompleteCallback,
        _timeout: Duration,
    ) -> Result<(), NetworkError> {
        std::thread::spawn(on_complete);
        Ok(())
    }

    fn lightweight_state(
        &self,
        _ip: Ipv4Addr,
        _kind: ConsoleKind,
        _timeout: Duration,
    ) -> Result<DiscoveryState, NetworkError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        Ok(self.script.lock().pop_front().unwrap_or(self.fallback))
    }
}

#[derive(Default)]
pub struct RecordingWake {
    pub sent: Mutex<Vec<(Ipv4Addr, String)>>,
}

impl RecordingWake {
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl WakeTransport for RecordingWake {
    fn send(&self, credential: &Credential, ip: Ipv4Addr, _kind: ConsoleKind) -> Result<(), NetworkError> {
        self.sent.lock().push((ip, credential.wake_credential.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegistrar {
    pub calls: AtomicUsize,
}

impl Registrar for FakeRegistrar {
    fn register(&self, _ip: Ipv4Addr, _pin: &str, _psn_id: PsnAccountId) -> Result<Credential, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(good_credential())
    }
}

/// Session init that succeeds, or fails with the given error
pub struct FakeInitiator {
    pub failure: Option<SessionInitError>,
    pub calls: AtomicUsize,
}

impl FakeInitiator {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            failure: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: SessionInitError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(error),
            calls: AtomicUsize::new(0),
        })
    }
}

impl SessionInitiator for FakeInitiator {
    fn init(
        &self,
        _credential: &Credential,
        ip: Ipv4Addr,
        kind: ConsoleKind,
        _firmware_version: u32,
    ) -> Result<SessionHandle, SessionInitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(SessionHandle {
                session_id: "session-1".into(),
                ip,
                kind,
                started_ms: START_MS,
            }),
        }
    }
}

/// Keeps every session handed over for streaming
#[derive(Default)]
pub struct RecordingMedia {
    pub attached: Mutex<Vec<SessionHandle>>,
}

impl MediaSink for RecordingMedia {
    fn attach(&self, session: SessionHandle) {
        self.attached.lock().push(session);
    }
}

pub fn good_credential() -> Credential {
    Credential::new("0a1b2c3d", [7u8; 16], "1234", ConsoleKind::Ps5, 0)
}

pub fn open_registry(dir: &Path, clock: Arc<ManualClock>) -> Arc<ConsoleRegistry> {
    Arc::new(ConsoleRegistry::open(DataPaths::new(dir), clock).expect("open registry"))
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<ConsoleRegistry>,
    pub probe: Arc<ScriptedProbe>,
    pub wake: Arc<RecordingWake>,
    pub registrar: Arc<FakeRegistrar>,
    pub initiator: Arc<FakeInitiator>,
    pub media: Arc<RecordingMedia>,
    pub coordinator: SessionCoordinator,
    pub transitions: Arc<Mutex<Vec<Transition>>>,
    pub tracker: Option<StateTracker>,
}

impl Harness {
    pub fn new(dir: &Path, probe: Arc<ScriptedProbe>, initiator: Arc<FakeInitiator>) -> Self {
        Self::build(dir, probe, initiator, SessionConfig::default(), false)
    }

    pub fn with_config(
        dir: &Path,
        probe: Arc<ScriptedProbe>,
        initiator: Arc<FakeInitiator>,
        config: SessionConfig,
    ) -> Self {
        Self::build(dir, probe, initiator, config, false)
    }

    /// Like `new`, plus a running background tracker attached to the coordinator
    ///
    /// The tracker gets its own transport that always answers standby, so
    /// it never consumes the coordinator's script.
    pub fn with_tracker(dir: &Path, probe: Arc<ScriptedProbe>, initiator: Arc<FakeInitiator>) -> Self {
        Self::build(dir, probe, initiator, SessionConfig::default(), true)
    }

    fn build(
        dir: &Path,
        probe: Arc<ScriptedProbe>,
        initiator: Arc<FakeInitiator>,
        config: SessionConfig,
        track: bool,
    ) -> Self {
        let clock = ManualClock::shared(START_MS);
        let registry = open_registry(dir, clock.clone());
        let wake = Arc::new(RecordingWake::default());
        let registrar = Arc::new(FakeRegistrar::default());
        let media = Arc::new(RecordingMedia::default());
        let mut coordinator = SessionCoordinator::new(
            registry.clone(),
            probe.clone(),
            wake.clone(),
            registrar.clone(),
            initiator.clone(),
            clock.clone(),
            config,
        )
        .with_psn_account(PsnAccountId(42))
        .with_media_sink(media.clone());

        let tracker = if track {
            let config = TrackerConfig {
                sleep_ms: 5,
                stagger_ms: 0,
                stop_timeout_ms: 1_000,
                ..Default::default()
            };
            let quiet = ScriptedProbe::new(&[], DiscoveryState::Standby);
            let tracker =
                StateTracker::start(registry.clone(), quiet, clock.clone(), config).expect("start tracker");
            coordinator = coordinator.with_tracker(tracker.handle());
            Some(tracker)
        } else {
            None
        };

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        coordinator.on_transition(move |t| sink.lock().push(t.clone()));

        Self {
            clock,
            registry,
            probe,
            wake,
            registrar,
            initiator,
            media,
            coordinator,
            transitions,
            tracker,
        }
    }

    pub fn tracker_paused(&self) -> bool {
        self.tracker.as_ref().map(|t| t.handle().is_paused()).unwrap_or(false)
    }

    pub fn states(&self) -> Vec<rpconnect::session::SessionState> {
        let transitions = self.transitions.lock();
        let mut states: Vec<_> = transitions.first().map(|t| t.from).into_iter().collect();
        states.extend(transitions.iter().map(|t| t.to));
        states
    }
}
