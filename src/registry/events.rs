//! Registry change notifications

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::console::DiscoveryState;

/// Registration status reported for a console IP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Registered,
    Unregistered,
}

/// Something observable changed in the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// Registration was created or destroyed for `ip`
    ConsoleStateChanged {
        ip: String,
        status: RegistrationStatus,
    },
    ConsoleAdded {
        host_id: String,
        ip: String,
    },
    ConsoleRemoved {
        host_id: String,
        ip: String,
    },
    /// Liveness of a known console changed
    PresenceChanged {
        host_id: String,
        ip: String,
        state: DiscoveryState,
    },
}

/// Fan-out of registry events to any number of subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<RegistryEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver events in order; dropped receivers are pruned
    pub fn publish(&self, events: Vec<RegistryEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| events.iter().all(|e| tx.send(e.clone()).is_ok()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
