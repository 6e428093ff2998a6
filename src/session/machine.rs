//! Session context and state machine driver
//!
//! A [`SessionMachine`] owns one connection attempt. Events are checked
//! against the transition table; accepted ones stamp the entry time,
//! reset the retry counter and are delivered, in order, to every
//! `state_changed` observer. [`SessionMachine::update`] turns expired
//! per-state timeouts into their canonical events.

use crossbeam_channel::{unbounded, Receiver};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{elapsed_ms, SharedClock};
use crate::console::ConsoleProbe;
use crate::constants::{
    DEFAULT_DISCOVERY_TIMEOUT_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_WAKE_ATTEMPTS,
    DEFAULT_RECONNECT_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_SESSION_INIT_TIMEOUT_MS,
    DEFAULT_WAKE_POLL_INTERVAL_MS, DEFAULT_WAKE_TIMEOUT_MS,
};
use crate::error::SessionError;
use crate::session::state::{next_state, SessionEvent, SessionState};

/// Timeouts, retry caps and auto-advance switches for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub discovery_timeout_ms: u64,
    pub wake_timeout_ms: u64,
    pub session_init_timeout_ms: u64,
    pub reconnect_timeout_ms: u64,
    pub max_wake_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub retry_backoff_ms: u64,
    pub enable_auto_wake: bool,
    pub enable_auto_reconnect: bool,

    /// Spacing between state checks while waiting for a console to wake
    pub wake_poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            wake_timeout_ms: DEFAULT_WAKE_TIMEOUT_MS,
            session_init_timeout_ms: DEFAULT_SESSION_INIT_TIMEOUT_MS,
            reconnect_timeout_ms: DEFAULT_RECONNECT_TIMEOUT_MS,
            max_wake_attempts: DEFAULT_MAX_WAKE_ATTEMPTS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            enable_auto_wake: false,
            enable_auto_reconnect: false,
            wake_poll_interval_ms: DEFAULT_WAKE_POLL_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// Timeout for `state`; `None` if the state has none
    pub fn timeout_for(&self, state: SessionState) -> Option<u64> {
        let ms = match state {
            SessionState::Discovering => self.discovery_timeout_ms,
            SessionState::Waking => self.wake_timeout_ms,
            SessionState::SessionInit => self.session_init_timeout_ms,
            SessionState::Reconnecting => self.reconnect_timeout_ms,
            _ => return None,
        };
        (ms > 0).then_some(ms)
    }
}

/// One accepted state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
    pub timestamp_ms: u64,
    pub reason: String,
}

/// The machine needs input it will not synthesize on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub state: SessionState,
    /// Event that would move the session forward
    pub event: SessionEvent,
    pub message: String,
}

pub type StateChangedCallback = Box<dyn Fn(&Transition) + Send + Sync>;
pub type ActionRequiredCallback = Box<dyn Fn(&ActionRequest) + Send + Sync>;

pub struct SessionMachine {
    id: Uuid,
    config: SessionConfig,
    clock: SharedClock,

    state: SessionState,
    previous: SessionState,
    state_entered_ms: u64,
    retry_count: u32,

    /// Wake attempts since the last RESET or successful wake
    wake_attempts: u32,

    /// Reconnect attempts since entering RECONNECTING
    reconnect_attempts: u32,

    /// Earliest time a WAKE_FAILED session may retry
    next_retry_ms: u64,

    last_transition: Option<Transition>,
    console: Option<ConsoleProbe>,
    pending_action: Option<SessionEvent>,

    state_changed: Vec<StateChangedCallback>,
    action_required: Vec<ActionRequiredCallback>,
}

impl std::fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMachine")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("previous", &self.previous)
            .field("retry_count", &self.retry_count)
            .field("wake_attempts", &self.wake_attempts)
            .finish()
    }
}

impl SessionMachine {
    pub fn new(config: SessionConfig, clock: SharedClock) -> Self {
        let now = clock.now_ms();
        Self {
            id: Uuid::new_v4(),
            config,
            clock,
            state: SessionState::Idle,
            previous: SessionState::Idle,
            state_entered_ms: now,
            retry_count: 0,
            wake_attempts: 0,
            reconnect_attempts: 0,
            next_retry_ms: 0,
            last_transition: None,
            console: None,
            pending_action: None,
            state_changed: Vec::new(),
            action_required: Vec::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn previous_state(&self) -> SessionState {
        self.previous
    }

    pub fn state_entered_ms(&self) -> u64 {
        self.state_entered_ms
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn wake_attempts(&self) -> u32 {
        self.wake_attempts
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn next_retry_ms(&self) -> u64 {
        self.next_retry_ms
    }

    pub fn last_transition(&self) -> Option<&Transition> {
        self.last_transition.as_ref()
    }

    pub fn console(&self) -> Option<&ConsoleProbe> {
        self.console.as_ref()
    }

    pub fn set_console(&mut self, probe: ConsoleProbe) {
        self.console = Some(probe);
    }

    /// Event suggested by the last action request, until acted on
    pub fn pending_action(&self) -> Option<SessionEvent> {
        self.pending_action
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn time_in_state_ms(&self) -> u64 {
        elapsed_ms(self.clock.now_ms(), self.state_entered_ms)
    }

    /// Time left before the current state's timeout fires
    pub fn time_remaining_ms(&self) -> Option<u64> {
        self.config
            .timeout_for(self.state)
            .map(|t| t.saturating_sub(self.time_in_state_ms()))
    }

    /// Whether another WAKE_REQUEST would be accepted now
    pub fn can_retry_wake(&self) -> bool {
        self.wake_attempts < self.config.max_wake_attempts && self.clock.now_ms() >= self.next_retry_ms
    }

    // ── Observers ────────────────────────────────────────────────

    pub fn on_state_changed<F>(&mut self, f: F)
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.state_changed.push(Box::new(f));
    }

    pub fn on_action_required<F>(&mut self, f: F)
    where
        F: Fn(&ActionRequest) + Send + Sync + 'static,
    {
        self.action_required.push(Box::new(f));
    }

    /// Channel of transitions, for observers on other threads
    pub fn subscribe(&mut self) -> Receiver<Transition> {
        let (tx, rx) = unbounded();
        self.on_state_changed(move |t| {
            let _ = tx.send(t.clone());
        });
        rx
    }

    // ── Events ───────────────────────────────────────────────────

    /// Feed an event; returns the state the machine settles in
    ///
    /// Rejected events leave the machine untouched and notify nobody.
    pub fn handle(&mut self, event: SessionEvent, reason: &str) -> Result<SessionState, SessionError> {
        let now = self.clock.now_ms();

        if event == SessionEvent::WakeRequest && self.state == SessionState::WakeFailed {
            if self.wake_attempts >= self.config.max_wake_attempts {
                tracing::warn!(
                    session = %self.id,
                    attempts = self.wake_attempts,
                    "Wake attempts exhausted"
                );
                return self.handle(SessionEvent::Error, "wake attempts exhausted");
            }
            if now < self.next_retry_ms {
                return Err(SessionError::RetryTooSoon {
                    remaining_ms: self.next_retry_ms - now,
                });
            }
        }

        let Some(to) = next_state(self.state, event) else {
            tracing::debug!(session = %self.id, state = %self.state, event = %event, "Event rejected");
            return Err(SessionError::InvalidState {
                state: self.state,
                event,
            });
        };

        self.apply(to, event, reason, now);
        self.auto_advance();
        Ok(self.state)
    }

    fn apply(&mut self, to: SessionState, event: SessionEvent, reason: &str, now: u64) {
        let from = self.state;
        self.previous = from;
        self.state = to;
        self.state_entered_ms = now;
        self.retry_count = 0;
        self.pending_action = None;

        match (to, event) {
            (SessionState::Idle, SessionEvent::Reset) => {
                self.wake_attempts = 0;
                self.reconnect_attempts = 0;
                self.next_retry_ms = 0;
                self.console = None;
            }
            (SessionState::Waking, _) => self.wake_attempts += 1,
            (SessionState::WakeFailed, _) => {
                self.next_retry_ms = now + self.config.retry_backoff_ms;
            }
            (SessionState::DiscoveredReady, SessionEvent::WakeSuccess) => self.wake_attempts = 0,
            (SessionState::Reconnecting, _) => self.reconnect_attempts = 0,
            _ => {}
        }

        let transition = Transition {
            from,
            to,
            event,
            timestamp_ms: now,
            reason: reason.to_string(),
        };
        tracing::info!(session = %self.id, from = %from, to = %to, event = %event, "{}", reason);
        for observer in &self.state_changed {
            observer(&transition);
        }
        self.last_transition = Some(transition);
    }

    fn auto_advance(&mut self) {
        match self.state {
            SessionState::DiscoveredStandby if self.config.enable_auto_wake => {
                if let Err(e) = self.handle(SessionEvent::WakeRequest, "auto wake") {
                    tracing::warn!(session = %self.id, "Auto wake rejected: {}", e);
                }
            }
            SessionState::DiscoveredStandby => {
                self.request_action(SessionEvent::WakeRequest, "Console is in standby; wake it to continue")
            }
            SessionState::DiscoveredReady if self.config.enable_auto_reconnect => {
                self.request_action(SessionEvent::SessionInitStart, "Console is ready; start the session")
            }
            _ => {}
        }
    }

    fn request_action(&mut self, event: SessionEvent, message: &str) {
        self.pending_action = Some(event);
        let request = ActionRequest {
            state: self.state,
            event,
            message: message.to_string(),
        };
        for observer in &self.action_required {
            observer(&request);
        }
    }

    // ── Timeouts ─────────────────────────────────────────────────

    /// Fire the current state's timeout if it has expired
    ///
    /// Returns the new state when a transition happened. A timed-out
    /// reconnect is retried in place until the attempt cap is reached.
    pub fn update(&mut self) -> Result<Option<SessionState>, SessionError> {
        let Some(timeout) = self.config.timeout_for(self.state) else {
            return Ok(None);
        };
        let now = self.clock.now_ms();
        let elapsed = elapsed_ms(now, self.state_entered_ms);
        if elapsed < timeout {
            return Ok(None);
        }

        if self.state == SessionState::Reconnecting {
            self.reconnect_attempts += 1;
            if self.reconnect_attempts < self.config.max_reconnect_attempts {
                self.retry_count += 1;
                self.state_entered_ms = now;
                tracing::debug!(
                    session = %self.id,
                    attempt = self.reconnect_attempts,
                    "Reconnect attempt timed out; retrying"
                );
                self.request_action(
                    SessionEvent::ReconnectSuccess,
                    &format!(
                        "Reconnect attempt {} of {} timed out; retrying",
                        self.reconnect_attempts, self.config.max_reconnect_attempts
                    ),
                );
                return Ok(None);
            }
        }

        let Some(event) = self.state.timeout_event() else {
            return Ok(None);
        };
        let reason = format!("{} timed out after {} ms", self.state, elapsed);
        self.handle(event, &reason).map(Some)
    }
}
