//! Re-probe scheduling and state reconciliation rules

use serde::{Deserialize, Serialize};

use crate::clock::elapsed_ms;
use crate::console::{ConsoleRecord, DiscoveryState};
use crate::constants::{
    DEFAULT_CHECK_INTERVAL_MS, DEFAULT_MAX_CONSOLES_PER_CYCLE, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_STAGGER_MS,
    DEFAULT_TRACKER_SLEEP_MS, FAILURE_GRACE_MS, READY_RECHECK_MS, STANDBY_DEBOUNCE_MS, STANDBY_RECHECK_MS,
    TRACKER_STOP_TIMEOUT_MS, UNKNOWN_RECHECK_MS,
};

/// Background tracker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Re-probe interval used when adaptive scheduling is off
    pub check_interval_ms: u64,

    /// Idle time between cycles
    pub sleep_ms: u64,

    /// Probe budget per cycle
    pub max_consoles_per_cycle: usize,

    /// Spacing between consecutive probes
    pub stagger_ms: u64,

    /// Timeout for one lightweight state check
    pub probe_timeout_ms: u64,

    /// Pick re-probe intervals from the console's current state
    pub adaptive: bool,

    pub enabled: bool,

    /// How long `stop` waits for the thread before detaching it
    pub stop_timeout_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            sleep_ms: DEFAULT_TRACKER_SLEEP_MS,
            max_consoles_per_cycle: DEFAULT_MAX_CONSOLES_PER_CYCLE,
            stagger_ms: DEFAULT_STAGGER_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            adaptive: true,
            enabled: true,
            stop_timeout_ms: TRACKER_STOP_TIMEOUT_MS,
        }
    }
}

/// How long a console in `state` may go without a probe
pub fn recheck_interval_ms(state: DiscoveryState, config: &TrackerConfig) -> u64 {
    if !config.adaptive {
        return config.check_interval_ms;
    }
    match state {
        DiscoveryState::Unknown => UNKNOWN_RECHECK_MS,
        DiscoveryState::Ready => READY_RECHECK_MS,
        DiscoveryState::Standby => STANDBY_RECHECK_MS,
    }
}

/// Whether `record` is due for a probe at `now_ms`
pub fn is_due(record: &ConsoleRecord, now_ms: u64, config: &TrackerConfig) -> bool {
    record.last_seen_ms == 0
        || elapsed_ms(now_ms, record.last_seen_ms) >= recheck_interval_ms(record.discovery_state, config)
}

/// Result of one lightweight state check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Answered(DiscoveryState),
    Failed,
}

/// What the tracker does with an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Persist a new state
    Apply(DiscoveryState),
    /// Same state, or a debounced flip: refresh `last_seen_ms` only
    Touch,
    /// Transient failure: leave the record alone
    Keep,
    /// Silent for too long: persist `UNKNOWN`
    Expire,
}

/// Reconcile an observation against the stored record
pub fn decide(record: &ConsoleRecord, observation: Observation, now_ms: u64) -> Decision {
    let current = record.discovery_state;
    match observation {
        Observation::Answered(DiscoveryState::Unknown) | Observation::Failed => {
            if elapsed_ms(now_ms, record.last_seen_ms) < FAILURE_GRACE_MS || current == DiscoveryState::Unknown {
                Decision::Keep
            } else {
                Decision::Expire
            }
        }
        Observation::Answered(observed) if observed == current => Decision::Touch,
        Observation::Answered(DiscoveryState::Standby)
            if current == DiscoveryState::Ready
                && elapsed_ms(now_ms, record.state_changed_ms) < STANDBY_DEBOUNCE_MS =>
        {
            Decision::Touch
        }
        Observation::Answered(observed) => Decision::Apply(observed),
    }
}
