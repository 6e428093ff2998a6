//! Session states, events and the transition table
//!
//! ```text
//!  IDLE ─► DISCOVERING ─► DISCOVERED_STANDBY ─► WAKING ─► DISCOVERED_READY
//!               │                 │               │              │
//!               ▼                 │               ▼              ▼
//!             ERROR               └──────────► WAKE_FAILED   SESSION_INIT ─► STREAMING ◄─► RECONNECTING
//!                                                                               │               │
//!                                                                               ▼               ▼
//!                                                                          DISCONNECTED    DISCONNECTED
//! ```
//!
//! Every state also accepts `RESET`, which returns to `IDLE`.

use std::fmt;

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Discovering,
    DiscoveredReady,
    DiscoveredStandby,
    Waking,
    WakeFailed,
    SessionInit,
    Streaming,
    Reconnecting,
    Disconnected,
    Error,
}

impl SessionState {
    pub const ALL: [SessionState; 11] = [
        Self::Idle,
        Self::Discovering,
        Self::DiscoveredReady,
        Self::DiscoveredStandby,
        Self::Waking,
        Self::WakeFailed,
        Self::SessionInit,
        Self::Streaming,
        Self::Reconnecting,
        Self::Disconnected,
        Self::Error,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Discovering => "DISCOVERING",
            Self::DiscoveredReady => "DISCOVERED_READY",
            Self::DiscoveredStandby => "DISCOVERED_STANDBY",
            Self::Waking => "WAKING",
            Self::WakeFailed => "WAKE_FAILED",
            Self::SessionInit => "SESSION_INIT",
            Self::Streaming => "STREAMING",
            Self::Reconnecting => "RECONNECTING",
            Self::Disconnected => "DISCONNECTED",
            Self::Error => "ERROR",
        }
    }

    /// `ERROR` and `DISCONNECTED` end a session context
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Disconnected)
    }

    /// Event synthesized when this state's timeout expires
    pub fn timeout_event(self) -> Option<SessionEvent> {
        match self {
            Self::Discovering => Some(SessionEvent::DiscoveryTimeout),
            Self::Waking => Some(SessionEvent::WakeTimeout),
            Self::SessionInit => Some(SessionEvent::SessionInitFailed),
            Self::Reconnecting => Some(SessionEvent::ReconnectFailed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── SessionEvent ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    StartDiscovery,
    ConsoleFoundReady,
    ConsoleFoundStandby,
    DiscoveryTimeout,
    WakeRequest,
    WakeSuccess,
    WakeTimeout,
    WakeFailed,
    SessionInitStart,
    SessionInitSuccess,
    SessionInitFailed,
    StreamingStart,
    StreamingFailed,
    ConnectionLost,
    ReconnectSuccess,
    ReconnectFailed,
    UserDisconnect,
    Error,
    Reset,
}

impl SessionEvent {
    pub const ALL: [SessionEvent; 19] = [
        Self::StartDiscovery,
        Self::ConsoleFoundReady,
        Self::ConsoleFoundStandby,
        Self::DiscoveryTimeout,
        Self::WakeRequest,
        Self::WakeSuccess,
        Self::WakeTimeout,
        Self::WakeFailed,
        Self::SessionInitStart,
        Self::SessionInitSuccess,
        Self::SessionInitFailed,
        Self::StreamingStart,
        Self::StreamingFailed,
        Self::ConnectionLost,
        Self::ReconnectSuccess,
        Self::ReconnectFailed,
        Self::UserDisconnect,
        Self::Error,
        Self::Reset,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::StartDiscovery => "START_DISCOVERY",
            Self::ConsoleFoundReady => "CONSOLE_FOUND_READY",
            Self::ConsoleFoundStandby => "CONSOLE_FOUND_STANDBY",
            Self::DiscoveryTimeout => "DISCOVERY_TIMEOUT",
            Self::WakeRequest => "WAKE_REQUEST",
            Self::WakeSuccess => "WAKE_SUCCESS",
            Self::WakeTimeout => "WAKE_TIMEOUT",
            Self::WakeFailed => "WAKE_FAILED",
            Self::SessionInitStart => "SESSION_INIT_START",
            Self::SessionInitSuccess => "SESSION_INIT_SUCCESS",
            Self::SessionInitFailed => "SESSION_INIT_FAILED",
            Self::StreamingStart => "STREAMING_START",
            Self::StreamingFailed => "STREAMING_FAILED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::ReconnectSuccess => "RECONNECT_SUCCESS",
            Self::ReconnectFailed => "RECONNECT_FAILED",
            Self::UserDisconnect => "USER_DISCONNECT",
            Self::Error => "ERROR",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Transition table ─────────────────────────────────────────────

/// Target state for `event` in `state`, or `None` if the table has no row
///
/// `RESET` is accepted everywhere. `ERROR` aborts any non-terminal state.
pub fn next_state(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (_, E::Reset) => Some(S::Idle),
        (s, E::Error) if !s.is_terminal() => Some(S::Error),

        (S::Idle, E::StartDiscovery) => Some(S::Discovering),

        (S::Discovering, E::ConsoleFoundReady) => Some(S::DiscoveredReady),
        (S::Discovering, E::ConsoleFoundStandby) => Some(S::DiscoveredStandby),
        (S::Discovering, E::DiscoveryTimeout) => Some(S::Error),

        (S::DiscoveredReady, E::SessionInitStart) => Some(S::SessionInit),

        (S::DiscoveredStandby, E::WakeRequest) => Some(S::Waking),
        (S::DiscoveredStandby, E::SessionInitStart) => Some(S::SessionInit),

        (S::Waking, E::WakeSuccess) => Some(S::DiscoveredReady),
        (S::Waking, E::WakeTimeout | E::WakeFailed) => Some(S::WakeFailed),

        (S::WakeFailed, E::WakeRequest) => Some(S::Waking),

        (S::SessionInit, E::SessionInitSuccess) => Some(S::Streaming),
        (S::SessionInit, E::SessionInitFailed) => Some(S::Error),

        (S::Streaming, E::ConnectionLost) => Some(S::Reconnecting),
        (S::Streaming, E::UserDisconnect) => Some(S::Disconnected),
        (S::Streaming, E::StreamingFailed) => Some(S::Error),

        (S::Reconnecting, E::ReconnectSuccess) => Some(S::Streaming),
        (S::Reconnecting, E::ReconnectFailed) => Some(S::Disconnected),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    #[test]
    fn display_uses_canonical_names() {
        assert_eq!(SessionState::DiscoveredStandby.to_string(), "DISCOVERED_STANDBY");
        assert_eq!(SessionEvent::SessionInitStart.to_string(), "SESSION_INIT_START");
    }

    #[test]
    fn reset_is_valid_everywhere() {
        for state in SessionState::ALL {
            assert_eq!(next_state(state, SessionEvent::Reset), Some(SessionState::Idle));
        }
    }

    #[test]
    fn happy_path_rows() {
        use SessionEvent as E;
        let path = [
            E::StartDiscovery,
            E::ConsoleFoundStandby,
            E::WakeRequest,
            E::WakeSuccess,
            E::SessionInitStart,
            E::SessionInitSuccess,
            E::ConnectionLost,
            E::ReconnectSuccess,
            E::UserDisconnect,
        ];
        let end = path.iter().try_fold(SessionState::Idle, |s, &e| next_state(s, e));
        assert_eq!(end, Some(SessionState::Disconnected));
    }

    #[test]
    fn unknown_rows_are_rejected() {
        assert_eq!(next_state(SessionState::Idle, SessionEvent::WakeSuccess), None);
        assert_eq!(next_state(SessionState::Streaming, SessionEvent::WakeRequest), None);
        assert_eq!(next_state(SessionState::Error, SessionEvent::Error), None);
    }

    #[test]
    fn every_state_is_reachable_from_idle() {
        let mut seen = HashSet::from([SessionState::Idle]);
        let mut queue = VecDeque::from([SessionState::Idle]);
        while let Some(state) = queue.pop_front() {
            for event in SessionEvent::ALL {
                if let Some(next) = next_state(state, event) {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        assert_eq!(seen.len(), SessionState::ALL.len());
    }

    #[test]
    fn timeout_events_match_table() {
        for state in SessionState::ALL {
            if let Some(event) = state.timeout_event() {
                assert!(next_state(state, event).is_some(), "{} has no {} row", state, event);
            }
        }
    }
}
