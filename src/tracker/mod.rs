//! Background console state tracker

pub mod policy;
pub mod worker;

pub use policy::{Decision, Observation, TrackerConfig};
pub use worker::{PauseGuard, StateTracker, TrackerHandle, TrackerStats};
