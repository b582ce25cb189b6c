//! Control service: the hexagonal core.
//!
//! [`ControlService`] owns the relay bank, the last-good cache, the
//! humidity lockout and the live configuration. The runtime loops and the
//! operator entry points call into it; all I/O flows through the port
//! traits it was built with.
//!
//! ```text
//!  acquisition ──▶ ┌──────────────────────────────┐ ──▶ StoragePort
//!                  │        ControlService         │
//!  maintenance ──▶ │ cache · hysteresis · lockout │ ──▶ NotificationSink
//!                  │ daylight · housekeeping      │
//!  commands ─────▶ └──────────────┬───────────────┘
//!                                 ▼
//!                           RelayActuator
//! ```
//!
//! Every method takes `&self`: the service is shared between the control
//! thread and the console thread behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Months;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::{SystemConfig, TimingConfig};
use crate::control::hysteresis::Hysteresis;
use crate::control::lockout::{HumidityLockout, LockoutState};
use crate::drivers::gpio::Gpio;
use crate::drivers::relay::{FailSafeGuard, RelayActuator};
use crate::error::{ActuatorError, ConfigError, Error, SensorError};
use crate::model::{
    ActuationRecord, ChannelId, LogEntry, Measurement, Reading, RelayId, SourceContext, Trigger,
};
use crate::scheduler::{DaylightWindow, Housekeeping};
use crate::sensors::{LastGoodCache, Settled};

use super::commands::Command;
use super::events::Notification;
use super::ports::{Clock, NotificationSink, StoragePort};

// ───────────────────────────────────────────────────────────────
// Wiring
// ───────────────────────────────────────────────────────────────

/// The driven adapters the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StoragePort>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

/// A humidity pulse that is due. The caller turns the relay on with
/// [`ControlService::begin_pulse`], waits `duration`, then calls
/// [`ControlService::end_pulse`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumidityPulse {
    pub relay: RelayId,
    pub duration: Duration,
    pub source: SourceContext,
}

// ───────────────────────────────────────────────────────────────
// ControlService
// ───────────────────────────────────────────────────────────────

pub struct ControlService {
    config: RwLock<SystemConfig>,
    relays: Arc<RelayActuator>,
    cache: Mutex<LastGoodCache>,
    lockout: Mutex<Option<HumidityLockout>>,
    housekeeping: Mutex<Housekeeping>,
    storage: Arc<dyn StoragePort>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl ControlService {
    /// Open the relay bank (every relay forced OFF) and set up the decision state.
    ///
    /// Sensor channels are opened separately, after this, so that a pin
    /// shared between a relay and a channel stays with the relay.
    pub fn new(config: SystemConfig, gpio: &Gpio, deps: Collaborators) -> Self {
        let relays = Arc::new(RelayActuator::open(
            gpio,
            &config.relays,
            deps.storage.clone(),
            deps.notifier.clone(),
            deps.clock.clone(),
        ));
        let lockout = config.humidity.map(HumidityLockout::new);
        let housekeeping = Housekeeping::from_timing(&config.timing);

        Self {
            config: RwLock::new(config),
            relays,
            cache: Mutex::new(LastGoodCache::new()),
            lockout: Mutex::new(lockout),
            housekeeping: Mutex::new(housekeeping),
            storage: deps.storage,
            notifier: deps.notifier,
            clock: deps.clock,
        }
    }

    // ── Acquisition ───────────────────────────────────────────

    /// Fold one channel's tick outcome into the cache, persist fresh
    /// readings and broadcast the result.
    pub fn settle_channel(
        &self,
        channel: ChannelId,
        outcome: Result<Measurement, SensorError>,
    ) -> Settled {
        let failure = outcome.as_ref().err().copied();
        let now = self.clock.now();
        let settled = self.cache.lock().settle(channel, outcome, now);

        match &settled {
            Settled::Fresh(reading) => {
                if let Err(e) = self.storage.append_reading(reading) {
                    warn!("SENSOR | channel {} reading not persisted: {}", channel, e);
                }
                self.notifier.notify(&Notification::ReadingUpdated(reading.clone()));
            }
            Settled::Fallback(reading) => {
                self.notifier.notify(&Notification::ReadingUpdated(reading.clone()));
            }
            Settled::NoData => {
                let message = failure.map_or_else(
                    || "no reading available".to_owned(),
                    |e| format!("no reading available: {e}"),
                );
                self.notifier.notify(&Notification::ErrorOccurred {
                    channel: Some(channel),
                    message,
                });
            }
        }
        settled
    }

    /// Run the decision rules that depend on `channel`.
    ///
    /// `reading` is `None` when the channel produced nothing this tick.
    /// Heating zones fall back to OFF unless the reading is live. Returns
    /// the humidity pulse to fire, if one is due.
    pub fn apply_reading(&self, channel: ChannelId, reading: Option<&Reading>) -> Option<HumidityPulse> {
        let (zones, band_c) = {
            let cfg = self.config.read();
            let zones: Vec<_> = cfg.heating.iter().filter(|z| z.channel == channel).copied().collect();
            (zones, cfg.hysteresis_c)
        };

        let source = reading.map_or(
            SourceContext {
                channel,
                temperature_c: None,
                humidity_pct: None,
            },
            SourceContext::from_reading,
        );
        let temperature = reading.and_then(Reading::live_temperature);

        for zone in &zones {
            let Some(current) = self.relays.get(zone.relay) else {
                continue;
            };
            let desired = Hysteresis::for_zone(zone, band_c).decide(temperature, current);
            let trigger = if temperature.is_some() {
                Trigger::TemperatureThreshold
            } else {
                Trigger::SensorInvalid
            };
            self.actuate(zone.relay, desired, trigger, Some(source));
        }

        let mut lockout = self.lockout.lock();
        let lockout = lockout.as_mut().filter(|l| l.rule().channel == channel)?;
        let humidity = reading.and_then(Reading::live_humidity);
        lockout.check(humidity, self.clock.now()).then(|| HumidityPulse {
            relay: lockout.rule().relay,
            duration: lockout.pulse(),
            source,
        })
    }

    /// Switch the pulse relay on. Returns `false` if it could not be switched.
    pub fn begin_pulse(&self, pulse: &HumidityPulse) -> bool {
        self.actuate(pulse.relay, true, Trigger::HumidityThreshold, Some(pulse.source));
        self.relays.get(pulse.relay) == Some(true)
    }

    pub fn end_pulse(&self, pulse: &HumidityPulse) {
        self.actuate(pulse.relay, false, Trigger::HumidityPulseComplete, Some(pulse.source));
    }

    // ── Maintenance ───────────────────────────────────────────

    /// One maintenance tick: daylight check, then housekeeping.
    pub fn maintenance_tick(&self) {
        if let Err(e) = self.check_daylight() {
            warn!("SCHEDULE | {} - daylight check skipped", e);
            self.notifier.notify(&Notification::ErrorOccurred {
                channel: None,
                message: e.to_string(),
            });
        }
        self.run_housekeeping();
    }

    /// Drive the daylight relay to match the configured window.
    ///
    /// A malformed window leaves the relay untouched.
    pub fn check_daylight(&self) -> Result<Option<ActuationRecord>, Error> {
        let Some(daylight) = self.config.read().daylight.clone() else {
            return Ok(None);
        };
        let window = DaylightWindow::parse(&daylight.on, &daylight.off)?;
        let desired = window.is_lit(self.clock.local_time());
        if self.relays.get(daylight.relay).is_none() {
            return Ok(None);
        }
        Ok(self.relays.set(daylight.relay, desired, Trigger::Scheduler, None)?)
    }

    /// Hourly operator-log snapshot and retention pruning, each on its own cadence.
    pub fn run_housekeeping(&self) {
        let now = self.clock.now();
        let (snapshot, prune) = {
            let mut hk = self.housekeeping.lock();
            (hk.take_snapshot(now), hk.take_prune(now))
        };

        if snapshot {
            match self.storage.latest_readings() {
                Ok(latest) => {
                    if let Err(e) = self.storage.append_log(&LogEntry::hourly_snapshot(now, &latest)) {
                        warn!("HOUSEKEEPING | snapshot not persisted: {}", e);
                    } else {
                        debug!("HOUSEKEEPING | snapshot of {} channels", latest.len());
                    }
                }
                Err(e) => warn!("HOUSEKEEPING | latest readings unavailable: {}", e),
            }
        }

        if prune {
            let months = self.config.read().log_retention_months;
            let Some(cutoff) = now.checked_sub_months(Months::new(months)) else {
                warn!("HOUSEKEEPING | retention of {} months out of range", months);
                return;
            };
            match self.storage.logs_older_than(cutoff) {
                Ok(expired) if expired.is_empty() => {}
                Ok(expired) => match self.storage.delete_logs_older_than(cutoff) {
                    Ok(n) => info!(
                        "HOUSEKEEPING | pruned {} of {} log entries before {}",
                        n,
                        expired.len(),
                        cutoff
                    ),
                    Err(e) => warn!("HOUSEKEEPING | prune failed: {}", e),
                },
                Err(e) => warn!("HOUSEKEEPING | expired log query failed: {}", e),
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────

    /// Process an operator command.
    pub fn handle_command(&self, cmd: Command) -> Result<(), Error> {
        match cmd {
            Command::ManualOverride { relay, on } => self.manual_override(relay, on).map(|_| ()),
            Command::UpdateSchedule { on, off } => self.update_schedule(&on, &off),
            Command::UpdateConfig(config) => self.update_config(*config),
        }
    }

    /// Force a relay. Same no-op rule as automatic actuation.
    pub fn manual_override(&self, relay: RelayId, on: bool) -> Result<Option<ActuationRecord>, Error> {
        let record = self.relays.set(relay, on, Trigger::ManualOverride, None)?;
        if record.is_none() {
            debug!("OVERRIDE | relay {} already {}", relay, if on { "ON" } else { "OFF" });
        }
        Ok(record)
    }

    /// Replace the daylight window and apply it immediately.
    pub fn update_schedule(&self, on: &str, off: &str) -> Result<(), Error> {
        DaylightWindow::parse(on, off)?;
        let snapshot = {
            let mut cfg = self.config.write();
            let daylight = cfg.daylight.as_mut().ok_or(ConfigError::ValidationFailed(
                "no daylight relay configured",
            ))?;
            daylight.on = on.trim().to_owned();
            daylight.off = off.trim().to_owned();
            cfg.clone()
        };
        info!("SCHEDULE | daylight window now {}-{}", on.trim(), off.trim());
        self.persist_config(&snapshot);
        self.check_daylight().map(|_| ())
    }

    /// Hot-reload thresholds, hysteresis, humidity, schedule, retention and
    /// cadences. Channel, relay and GPIO settings stay as they are until
    /// restart.
    pub fn update_config(&self, mut new: SystemConfig) -> Result<(), Error> {
        {
            let current = self.config.read();
            if new.channels != current.channels || new.relays != current.relays || new.gpio != current.gpio {
                warn!("CONFIG | pin assignments changed - they take effect after restart");
            }
            new.channels = current.channels.clone();
            new.relays = current.relays.clone();
            new.gpio = current.gpio.clone();
        }
        new.validate()?;

        {
            let mut lockout = self.lockout.lock();
            *lockout = match (lockout.take(), new.humidity) {
                (Some(mut l), Some(rule)) if l.rule().channel == rule.channel && l.rule().relay == rule.relay => {
                    l.reconfigure(rule);
                    Some(l)
                }
                (_, rule) => rule.map(HumidityLockout::new),
            };
        }
        if new.timing != self.config.read().timing {
            *self.housekeeping.lock() = Housekeeping::from_timing(&new.timing);
        }

        self.persist_config(&new);
        *self.config.write() = new;
        info!("CONFIG | updated at runtime");
        if let Err(e) = self.check_daylight() {
            warn!("SCHEDULE | {} - daylight check skipped", e);
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    /// Clone of the live configuration.
    pub fn config(&self) -> SystemConfig {
        self.config.read().clone()
    }

    pub fn timing(&self) -> TimingConfig {
        self.config.read().timing
    }

    pub fn relay_state(&self, relay: RelayId) -> Option<bool> {
        self.relays.get(relay)
    }

    pub fn relay_states(&self) -> std::collections::BTreeMap<RelayId, bool> {
        self.relays.states()
    }

    pub fn lockout_state(&self) -> Option<LockoutState> {
        self.lockout.lock().as_ref().map(HumidityLockout::state)
    }

    /// Most recent valid reading for `channel`.
    pub fn last_good(&self, channel: ChannelId) -> Option<Reading> {
        self.cache.lock().get(channel).cloned()
    }

    pub fn relays(&self) -> &Arc<RelayActuator> {
        &self.relays
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// A guard that forces every relay OFF when dropped.
    pub fn fail_safe_guard(&self) -> FailSafeGuard {
        FailSafeGuard::new(self.relays.clone())
    }

    pub fn shutdown(&self) {
        self.relays.shutdown();
    }

    // ── Internal ──────────────────────────────────────────────

    fn actuate(
        &self,
        relay: RelayId,
        desired: bool,
        trigger: Trigger,
        source: Option<SourceContext>,
    ) -> Option<ActuationRecord> {
        match self.relays.set(relay, desired, trigger, source) {
            Ok(record) => record,
            Err(ActuatorError::Released) => {
                debug!("relay {} not switched: shutting down", relay);
                None
            }
            Err(e) => {
                warn!("RELAY | {}", e);
                self.notifier.notify(&Notification::ErrorOccurred {
                    channel: source.map(|s| s.channel),
                    message: e.to_string(),
                });
                None
            }
        }
    }

    fn persist_config(&self, config: &SystemConfig) {
        if let Err(e) = self.storage.upsert_config(config) {
            warn!("CONFIG | not persisted: {}", e);
        }
    }
}
