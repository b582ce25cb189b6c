//! Shared fixtures: a control service wired to the simulated GPIO backend,
//! an in-process store, a recording notifier and a manual clock.

use std::sync::Arc;

use parking_lot::Mutex;

use terrarium::adapters::memory_store::MemoryStore;
use terrarium::adapters::sim::SimGpio;
use terrarium::adapters::time::ManualClock;
use terrarium::app::events::Notification;
use terrarium::app::ports::NotificationSink;
use terrarium::app::service::{Collaborators, ControlService};
use terrarium::config::SystemConfig;
use terrarium::drivers::gpio::Gpio;
use terrarium::model::{Measurement, Trigger};

// ── Recording notifier ────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<Notification>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn errors(&self) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|n| matches!(n, Notification::ErrorOccurred { .. }))
            .collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.seen.lock().push(notification.clone());
    }
}

// ── Fixture ───────────────────────────────────────────────────

pub struct Rig {
    pub backend: Arc<SimGpio>,
    pub gpio: Gpio,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub service: Arc<ControlService>,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    pub fn with_config(config: SystemConfig) -> Self {
        Self::on_backend(config, Arc::new(SimGpio::virtual_time()))
    }

    pub fn on_backend(config: SystemConfig, backend: Arc<SimGpio>) -> Self {
        let gpio = Gpio::new(backend.clone());
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::default());
        let service = Arc::new(ControlService::new(
            config,
            &gpio,
            Collaborators {
                storage: store.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
            },
        ));
        Self {
            backend,
            gpio,
            store,
            notifier,
            clock,
            service,
        }
    }

    /// Triggers of every persisted actuation for `relay`, oldest first.
    pub fn triggers(&self, relay: u8) -> Vec<(bool, Trigger)> {
        self.store
            .actuations()
            .into_iter()
            .filter(|a| a.relay.0 == relay)
            .map(|a| (a.state, a.trigger))
            .collect()
    }
}

pub fn m(temperature_c: f32, humidity_pct: f32) -> Measurement {
    Measurement {
        temperature_c,
        humidity_pct,
    }
}
