//! Relay bank driver (6-channel opto-isolated relay board, active HIGH).
//!
//! Fail-safe lifecycle:
//! 1. Startup: every configured relay pin is claimed and driven LOW
//!    whatever state the board was left in.
//! 2. Runtime: [`RelayActuator::set`] is the only way to change a relay.
//!    Setting the current state is a no-op: no write, no audit record.
//! 3. Shutdown: every relay is driven LOW *before* any pin is released.
//!    Runs from [`RelayActuator::shutdown`], from `Drop`, and from
//!    [`FailSafeGuard`] so it happens on every exit path that unwinds.
//!
//! ## Dual-mode design
//!
//! With a GPIO controller: drives the claimed output pin.
//! Software-only: tracks state in memory only.

use std::collections::BTreeMap;
use std::sync::Arc;

use embedded_hal::digital::{OutputPin, PinState};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::app::events::Notification;
use crate::app::ports::{Clock, NotificationSink, StoragePort};
use crate::config::RelayConfig;
use crate::drivers::gpio::{ClaimedOutput, Gpio};
use crate::error::{ActuatorError, Error};
use crate::model::{ActuationRecord, LogEntry, RelayId, SourceContext, Trigger};
use crate::pins::PinId;

/// One relay and its current state.
pub struct RelayChannel {
    pub id: RelayId,
    pub label: String,
    pub pin: PinId,
    energised: bool,
    output: Option<ClaimedOutput>,
}

impl RelayChannel {
    pub fn is_on(&self) -> bool {
        self.energised
    }

    /// `false` in software-only mode.
    pub fn is_physical(&self) -> bool {
        self.output.is_some()
    }
}

struct Bank {
    channels: BTreeMap<RelayId, RelayChannel>,
    released: bool,
}

/// Owns the relay state map and every relay pin.
pub struct RelayActuator {
    bank: Mutex<Bank>,
    storage: Arc<dyn StoragePort>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl RelayActuator {
    /// Claim every relay pin and force it OFF.
    ///
    /// A relay whose pin is already claimed is skipped. A relay that cannot
    /// be opened for any other reason is kept in software-only mode.
    pub fn open(
        gpio: &Gpio,
        relays: &[RelayConfig],
        storage: Arc<dyn StoragePort>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut channels = BTreeMap::new();
        for cfg in relays {
            let output = match gpio.claim_output(cfg.pin) {
                Ok(mut out) => {
                    if let Err(e) = out.set_low() {
                        error!("RELAY | {} ({}) could not be forced OFF: {}", cfg.id, cfg.label, e);
                    }
                    Some(out)
                }
                Err(Error::PinConflict(pin)) => {
                    warn!("RELAY | {} ({}) skipped: {} already claimed", cfg.id, cfg.label, pin);
                    continue;
                }
                Err(e) => {
                    if !gpio.is_software_only() {
                        warn!("RELAY | {} ({}) software-only: {}", cfg.id, cfg.label, e);
                    }
                    None
                }
            };
            debug!("RELAY | {} ({}) on {} OFF", cfg.id, cfg.label, cfg.pin);
            channels.insert(
                cfg.id,
                RelayChannel {
                    id: cfg.id,
                    label: cfg.label.clone(),
                    pin: cfg.pin,
                    energised: false,
                    output,
                },
            );
        }
        info!("RELAY | {} relays initialised OFF", channels.len());

        Self {
            bank: Mutex::new(Bank {
                channels,
                released: false,
            }),
            storage,
            notifier,
            clock,
        }
    }

    pub fn get(&self, id: RelayId) -> Option<bool> {
        self.bank.lock().channels.get(&id).map(RelayChannel::is_on)
    }

    pub fn states(&self) -> BTreeMap<RelayId, bool> {
        self.bank
            .lock()
            .channels
            .iter()
            .map(|(id, ch)| (*id, ch.energised))
            .collect()
    }

    pub fn is_physical(&self, id: RelayId) -> bool {
        self.bank
            .lock()
            .channels
            .get(&id)
            .is_some_and(RelayChannel::is_physical)
    }

    /// Drive `id` to `desired`.
    ///
    /// Returns `Ok(None)` when the relay is already in that state.
    /// On a change the audit record is persisted and broadcast; storage
    /// failures are logged and do not undo the switch.
    pub fn set(
        &self,
        id: RelayId,
        desired: bool,
        trigger: Trigger,
        source: Option<SourceContext>,
    ) -> Result<Option<ActuationRecord>, ActuatorError> {
        let (record, label) = {
            let mut bank = self.bank.lock();
            if bank.released {
                return Err(ActuatorError::Released);
            }
            let ch = bank
                .channels
                .get_mut(&id)
                .ok_or(ActuatorError::UnknownRelay(id))?;
            if ch.energised == desired {
                return Ok(None);
            }
            if let Some(out) = ch.output.as_mut() {
                out.set_state(PinState::from(desired))
                    .map_err(|e| ActuatorError::WriteFailed(id, e))?;
            }
            ch.energised = desired;
            let record = ActuationRecord {
                timestamp: self.clock.now(),
                relay: id,
                state: desired,
                trigger,
                source,
            };
            (record, ch.label.clone())
        };

        info!(
            "RELAY | {} ({}) -> {} [{}]",
            id,
            label,
            if desired { "ON" } else { "OFF" },
            trigger
        );

        if let Err(e) = self.storage.append_actuation(&record) {
            warn!("RELAY | audit record not persisted: {}", e);
        }
        if let Err(e) = self.storage.append_log(&LogEntry::state_change(&record)) {
            warn!("RELAY | log entry not persisted: {}", e);
        }
        self.notifier.notify(&Notification::RelayChanged {
            relay: id,
            state: desired,
            trigger,
            at: record.timestamp,
        });

        Ok(Some(record))
    }

    /// Force every relay OFF, then release every pin. Idempotent.
    pub fn shutdown(&self) {
        let mut bank = self.bank.lock();
        if bank.released {
            return;
        }
        bank.released = true;

        for ch in bank.channels.values_mut() {
            if let Some(out) = ch.output.as_mut() {
                if let Err(e) = out.set_low() {
                    error!("RELAY | {} ({}) could not be forced OFF: {}", ch.id, ch.label, e);
                }
            }
            ch.energised = false;
        }
        for ch in bank.channels.values_mut() {
            ch.output = None;
        }
        info!("RELAY | fail-safe: {} relays OFF, pins released", bank.channels.len());
    }

    pub fn is_released(&self) -> bool {
        self.bank.lock().released
    }
}

impl Drop for RelayActuator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs the fail-safe shutdown when dropped, including during unwinding.
///
/// Hold one on the host's main thread: worker threads may still own
/// clones of the actuator when the process is about to exit.
pub struct FailSafeGuard(Arc<RelayActuator>);

impl FailSafeGuard {
    pub fn new(relays: Arc<RelayActuator>) -> Self {
        Self(relays)
    }
}

impl Drop for FailSafeGuard {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
