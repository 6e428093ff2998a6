//! End-to-end flows over a temp data directory with fake transports

mod common;

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use common::*;
use rpconnect::clock::{Clock, ManualClock};
use rpconnect::console::{ConsoleKind, ConsoleProbe, ConsoleRecord, DiscoveryState, PsnAccountId};
use rpconnect::error::{ErrorKind, SessionError, SessionInitFailure, WakeFailure};
use rpconnect::registry::{RegistrationStatus, RegistryEvent};
use rpconnect::session::{SessionConfig, SessionEvent, SessionInitError, SessionState};
use rpconnect::storage::codec::{write_cache_atomic, write_credentials_atomic};
use rpconnect::storage::{ConsoleCache, Credential, CredentialStore, DataPaths};
use rpconnect::Error;

fn ps5_probe(host_id: &str, ip: &str, state: DiscoveryState) -> ConsoleProbe {
    ConsoleProbe::new(host_id, ip, ConsoleKind::Ps5, state)
}

fn registered_standby(h: &Harness) {
    h.registry.add(&ps5_probe("HID1", IP, DiscoveryState::Standby)).unwrap();
    h.registry.store_credential(IP, good_credential()).unwrap();
}

// ── Registry ─────────────────────────────────────────────────────

#[test]
fn empty_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_registry(dir.path(), ManualClock::shared(START_MS));

    let cache = registry.load().unwrap();
    assert!(cache.is_empty());
    assert!(cache.valid);
    assert!(!registry.is_registered(IP));

    registry.add(&ps5_probe("HID1", IP, DiscoveryState::Ready)).unwrap();
    registry.save().unwrap();

    let cache = registry.load().unwrap();
    assert_eq!(cache.console_count(), 1);
    let record = &cache.consoles()[0];
    assert_eq!(record.host_id, "HID1");
    assert_eq!(record.ip, IP);
    assert_eq!(record.kind, ConsoleKind::Ps5);
    assert_eq!(record.discovery_state, DiscoveryState::Ready);
}

#[test]
fn registration_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), ScriptedProbe::new(&[], DiscoveryState::Ready), FakeInitiator::ok());
    let events = h.registry.subscribe();
    h.registry.add(&ps5_probe("HID1", IP, DiscoveryState::Ready)).unwrap();

    let credential = h
        .coordinator
        .register(IP, "12345678", Some(PsnAccountId(42)))
        .unwrap();
    assert!(credential.has_hex8());
    assert!(credential.has_morning16());
    assert_eq!(credential.created_ms, START_MS);
    assert!(h.registry.is_registered(IP));
    assert_eq!(h.registry.registration_status(IP), RegistrationStatus::Registered);

    // a fresh handle sees the same thing from disk
    let reopened = open_registry(dir.path(), h.clock.clone());
    assert!(reopened.is_registered(IP));
    drop(reopened);

    h.registry.remove("HID1").unwrap();
    assert!(!h.registry.is_registered(IP));
    assert!(h.registry.credential(IP).is_none());

    let seen: Vec<RegistryEvent> = events.try_iter().collect();
    assert!(seen.contains(&RegistryEvent::ConsoleStateChanged {
        ip: IP.into(),
        status: RegistrationStatus::Registered,
    }));
    assert!(seen.contains(&RegistryEvent::ConsoleStateChanged {
        ip: IP.into(),
        status: RegistrationStatus::Unregistered,
    }));
}

#[test]
fn split_brain_flag_is_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path());

    let mut record = ConsoleRecord::from_probe(&ps5_probe("HID1", IP, DiscoveryState::Standby), START_MS);
    record.is_registered = true;
    let cache = ConsoleCache::from_records(vec![record], 1, START_MS);
    write_cache_atomic(&paths.consoles, &cache).unwrap();

    // the cache type reports the repair on its own
    let mut raw = cache.clone();
    let report = raw.validate(|_| false).unwrap();
    assert_eq!(report.registrations_cleared, vec![IP.to_string()]);

    let registry = open_registry(dir.path(), ManualClock::shared(START_MS));
    let report = registry.validate().unwrap();
    assert_eq!(report.dropped_invalid, 0);
    assert!(!registry.is_registered(IP));
    assert!(!registry.find_by_ip(IP).unwrap().is_registered);

    let persisted = rpconnect::storage::codec::load_cache(&paths.consoles).unwrap();
    assert!(!persisted.consoles()[0].is_registered);
}

#[test]
fn mock_credentials_are_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path());

    let registry = open_registry(dir.path(), ManualClock::shared(START_MS));
    registry.add(&ps5_probe("HID1", IP, DiscoveryState::Ready)).unwrap();
    registry.add(&ps5_probe("HID2", "192.168.1.51", DiscoveryState::Ready)).unwrap();
    registry.store_credential("192.168.1.51", good_credential()).unwrap();
    registry.shutdown();

    let mut store = rpconnect::storage::codec::read_credentials(&paths.registrations);
    let mut mock = good_credential();
    mock.registration_key = "MOCK1234".into();
    store.insert(IP, mock);
    write_credentials_atomic(&paths.registrations, &store).unwrap();

    let registry = open_registry(dir.path(), ManualClock::shared(START_MS));
    assert!(!registry.is_registered(IP));
    assert_eq!(registry.cleanup_invalid().unwrap(), 1);

    assert!(!registry.is_registered(IP));
    assert!(registry.credential(IP).is_none());
    assert_eq!(registry.find_by_ip(IP).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(registry.is_registered("192.168.1.51"));
    assert!(registry.validate().unwrap().is_clean());

    let store: CredentialStore = rpconnect::storage::codec::read_credentials(&paths.registrations);
    assert_eq!(store.len(), 1);
}

#[test]
fn seventeenth_console_is_rejected_without_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_registry(dir.path(), ManualClock::shared(START_MS));
    for n in 0..16 {
        registry
            .add(&ps5_probe(&format!("HID{n}"), &format!("10.0.0.{}", n + 1), DiscoveryState::Standby))
            .unwrap();
    }
    let before = registry.snapshot().unwrap();

    let err = registry
        .add(&ps5_probe("HID16", "10.0.0.17", DiscoveryState::Standby))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CacheFull);
    assert_eq!(registry.snapshot().unwrap().consoles(), before.consoles());
}

#[test]
fn removing_the_only_console_leaves_valid_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_registry(dir.path(), ManualClock::shared(START_MS));
    registry.add(&ps5_probe("HID1", IP, DiscoveryState::Ready)).unwrap();
    registry.remove("HID1").unwrap();

    let cache = registry.load().unwrap();
    assert!(cache.is_empty());
    assert!(cache.valid);
}

#[test]
fn shutdown_refuses_further_calls() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_registry(dir.path(), ManualClock::shared(START_MS));
    registry.add(&ps5_probe("HID1", IP, DiscoveryState::Ready)).unwrap();
    registry.shutdown();

    assert_eq!(registry.consoles().unwrap_err().kind(), ErrorKind::NotInitialized);
    assert!(!registry.is_registered(IP));
}

// ── Coordinator ──────────────────────────────────────────────────

#[test]
fn wake_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ScriptedProbe::new(
        &[DiscoveryState::Standby, DiscoveryState::Standby, DiscoveryState::Ready],
        DiscoveryState::Ready,
    );
    let h = Harness::new(dir.path(), probe, FakeInitiator::ok());
    registered_standby(&h);

    let handle = h.coordinator.start_streaming(IP).unwrap();
    assert_eq!(handle.ip.to_string(), IP);

    assert_eq!(
        h.states(),
        vec![
            SessionState::Idle,
            SessionState::Discovering,
            SessionState::DiscoveredStandby,
            SessionState::Waking,
            SessionState::DiscoveredReady,
            SessionState::SessionInit,
            SessionState::Streaming,
        ]
    );
    assert_eq!(h.probe.polls(), 3);
    assert_eq!(h.wake.count(), 1);
    assert_eq!(h.wake.sent.lock()[0].1, "1234");
    assert_eq!(h.coordinator.active_state(), Some(SessionState::Streaming));

    let record = h.registry.find_by_ip(IP).unwrap();
    assert_eq!(record.discovery_state, DiscoveryState::Ready);
    assert_eq!(record.connection_count, 1);
    assert!(record.last_connected_ms >= START_MS);

    let attached = h.media.attached.lock().clone();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].session_id, "session-1");

    h.coordinator.disconnect().unwrap();
    assert_eq!(h.states().last(), Some(&SessionState::Disconnected));
    assert!(h.coordinator.active_state().is_none());
}

#[test]
fn wake_timeout_exhausts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ScriptedProbe::new(&[], DiscoveryState::Standby);
    let h = Harness::new(dir.path(), probe, FakeInitiator::ok());
    registered_standby(&h);
    let started = h.clock.now_ms();

    let err = h.coordinator.start_streaming(IP).unwrap_err();
    assert!(matches!(
        err,
        Error::Session(rpconnect::error::SessionError::WakeFailed(
            rpconnect::error::WakeFailure::StillStandby
        ))
    ));

    let transitions = h.transitions.lock().clone();
    let timeouts = transitions
        .iter()
        .filter(|t| t.event == SessionEvent::WakeTimeout)
        .count();
    assert_eq!(timeouts, 3);
    assert!(transitions
        .iter()
        .filter(|t| t.event == SessionEvent::WakeTimeout)
        .all(|t| t.from == SessionState::Waking && t.to == SessionState::WakeFailed));
    let last = transitions.last().unwrap();
    assert_eq!(last.event, SessionEvent::Error);
    assert_eq!(last.to, SessionState::Error);

    assert_eq!(h.wake.count(), 3);
    assert_eq!(h.initiator.calls.load(Ordering::SeqCst), 0);
    assert!(h.clock.now_ms() - started >= 3 * 30_000);
    assert!(h.coordinator.active_state().is_none());
}

#[test]
fn ready_console_skips_wake() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), ScriptedProbe::new(&[], DiscoveryState::Ready), FakeInitiator::ok());
    h.registry.add(&ps5_probe("HID1", IP, DiscoveryState::Ready)).unwrap();
    h.registry.store_credential(IP, good_credential()).unwrap();

    h.coordinator.start_streaming(IP).unwrap();
    assert_eq!(h.wake.count(), 0);
    assert_eq!(h.probe.polls(), 0);
    assert!(!h.states().contains(&SessionState::Waking));
}

#[test]
fn session_init_failure_lands_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let initiator = FakeInitiator::failing(SessionInitError::new(SessionInitFailure::AuthFailed, "rejected"));
    let h = Harness::new(dir.path(), ScriptedProbe::new(&[], DiscoveryState::Ready), initiator);
    h.registry.add(&ps5_probe("HID1", IP, DiscoveryState::Ready)).unwrap();
    h.registry.store_credential(IP, good_credential()).unwrap();

    let err = h.coordinator.start_streaming(IP).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailed);
    assert_eq!(h.states().last(), Some(&SessionState::Error));
    assert_eq!(h.registry.find_by_ip(IP).unwrap().connection_count, 0);
    assert!(h.media.attached.lock().is_empty());
}

#[test]
fn unregistered_console_fails_before_any_transport_call() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), ScriptedProbe::new(&[], DiscoveryState::Ready), FakeInitiator::ok());
    h.registry.add(&ps5_probe("HID1", IP, DiscoveryState::Standby)).unwrap();

    let err = h.coordinator.start_streaming(IP).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotRegistered);
    assert!(h.transitions.lock().is_empty());
    assert_eq!(h.wake.count(), 0);
    assert_eq!(h.probe.polls(), 0);
}

#[test]
fn bad_pins_never_reach_the_registrar() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), ScriptedProbe::new(&[], DiscoveryState::Ready), FakeInitiator::ok());

    for pin in ["1234567a", "1234567", "123456789", "", "12 45678"] {
        let err = h.coordinator.register(IP, pin, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam, "pin {pin:?}");
    }
    assert_eq!(h.registrar.calls.load(Ordering::SeqCst), 0);
    assert!(!h.registry.is_registered(IP));
}

#[test]
fn wake_only_needs_a_usable_credential() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), ScriptedProbe::new(&[], DiscoveryState::Ready), FakeInitiator::ok());
    h.registry.add(&ps5_probe("HID1", IP, DiscoveryState::Standby)).unwrap();

    assert_eq!(h.coordinator.wake_only(IP).unwrap_err().kind(), ErrorKind::NotRegistered);

    let credential = Credential {
        wake_credential: "99".into(),
        ..good_credential()
    };
    h.registry.store_credential(IP, credential).unwrap();
    h.coordinator.wake_only(IP).unwrap();
    let expected: Vec<(Ipv4Addr, String)> = vec![(IP.parse().unwrap(), "99".to_string())];
    assert_eq!(*h.wake.sent.lock(), expected);
}

#[test]
fn disconnect_without_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), ScriptedProbe::new(&[], DiscoveryState::Ready), FakeInitiator::ok());
    assert_eq!(h.coordinator.disconnect().unwrap_err().kind(), ErrorKind::NotConnected);
}

#[test]
fn wake_without_deadline_outlasts_the_default_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        wake_timeout_ms: 0,
        ..Default::default()
    };
    let probe = ScriptedProbe::new(&[DiscoveryState::Standby; 20], DiscoveryState::Ready);
    let h = Harness::with_config(dir.path(), probe, FakeInitiator::ok(), config);
    registered_standby(&h);

    h.coordinator.start_streaming(IP).unwrap();

    assert_eq!(h.probe.polls(), 21);
    assert_eq!(h.wake.count(), 1);
    assert!(h.clock.now_ms() - START_MS >= 20 * 2_000);
    assert!(!h
        .transitions
        .lock()
        .iter()
        .any(|t| t.event == SessionEvent::WakeTimeout));
    assert_eq!(h.states().last(), Some(&SessionState::Streaming));
}

// ── Tracker interplay ────────────────────────────────────────────

/// Records whether the tracker was paused each time the coordinator polls
fn watch_pauses(h: &Harness) -> Arc<Mutex<Vec<bool>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = h.tracker.as_ref().expect("tracker attached").handle();
    let sink = seen.clone();
    h.probe.on_poll(move || sink.lock().push(handle.is_paused()));
    seen
}

#[test]
fn tracker_pauses_for_a_successful_wake() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ScriptedProbe::new(&[DiscoveryState::Standby], DiscoveryState::Ready);
    let h = Harness::with_tracker(dir.path(), probe, FakeInitiator::ok());
    registered_standby(&h);
    let seen = watch_pauses(&h);
    assert!(!h.tracker_paused());

    h.coordinator.start_streaming(IP).unwrap();

    assert_eq!(*seen.lock(), vec![true, true]);
    assert!(!h.tracker_paused());
    assert_eq!(h.media.attached.lock().len(), 1);
}

#[test]
fn tracker_resumes_after_a_failed_wake() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ScriptedProbe::new(&[], DiscoveryState::Standby);
    let h = Harness::with_tracker(dir.path(), probe, FakeInitiator::ok());
    registered_standby(&h);
    let seen = watch_pauses(&h);

    let err = h.coordinator.start_streaming(IP).unwrap_err();
    assert!(matches!(
        err,
        Error::Session(SessionError::WakeFailed(WakeFailure::StillStandby))
    ));

    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|paused| *paused));
    assert!(!h.tracker_paused());
}

#[test]
fn cancel_from_another_thread_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ScriptedProbe::new(&[], DiscoveryState::Standby);
    let h = Harness::with_tracker(dir.path(), probe, FakeInitiator::ok());
    registered_standby(&h);

    // hold the coordinator inside its first state check until released
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    h.probe.on_poll(move || {
        let _ = entered_tx.send(());
        let _ = release_rx.recv();
    });

    let coordinator = &h.coordinator;
    let result = std::thread::scope(|s| {
        let run = s.spawn(move || coordinator.start_streaming(IP));
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("coordinator never started waiting");
        assert_eq!(coordinator.active_state(), Some(SessionState::Waking));
        assert!(h.tracker_paused());

        coordinator.cancel_session();
        drop(release_tx);
        run.join().unwrap()
    });

    assert!(matches!(result, Err(Error::Session(SessionError::Cancelled))));
    let last = h.transitions.lock().last().cloned().unwrap();
    assert_eq!(last.event, SessionEvent::Reset);
    assert_eq!(last.to, SessionState::Idle);
    assert!(h.coordinator.active_state().is_none());
    assert!(!h.tracker_paused());
    assert_eq!(h.wake.count(), 1);
    assert_eq!(h.initiator.calls.load(Ordering::SeqCst), 0);
}
