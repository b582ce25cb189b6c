//! System configuration parameters
//!
//! All tunable parameters for the enclosure controller. Loaded from a JSON
//! file by the host binary and pushed to the storage collaborator on start.
//! Every field has a default, so a partial file only overrides what it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::{ChannelId, RelayId};
use crate::pins::{self, PinId};

/// Longest humidity lockout accepted (one year).
pub const MAX_LOCKOUT_HOURS: u32 = 24 * 366;

/// One single-wire sensor channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub pin: PinId,
    pub label: String,
}

/// One relay output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub id: RelayId,
    pub pin: PinId,
    pub label: String,
}

/// A heating relay driven by one channel's temperature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatingZone {
    pub channel: ChannelId,
    pub relay: RelayId,
    /// Relay switches on below this temperature (°C).
    pub target_c: f32,
}

/// Humidity pulse rule for the designated channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HumidityConfig {
    pub channel: ChannelId,
    pub relay: RelayId,
    /// Pulse when relative humidity drops below this (%).
    pub threshold_pct: f32,
    /// Cooldown after a pulse before another may fire.
    pub lockout_hours: u32,
    /// How long the relay stays on per pulse.
    pub pulse_ms: u64,
}

/// Daylight lamp window, wall-clock `HH:MM` strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaylightConfig {
    pub relay: RelayId,
    pub on: String,
    pub off: String,
}

/// Loop cadences and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Acquisition tick interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Transactions attempted per channel per tick
    pub read_attempts: u8,
    /// Pause between failed attempts (milliseconds)
    pub retry_delay_ms: u64,
    /// Maintenance tick interval (milliseconds)
    pub maintenance_interval_ms: u64,
    /// Operator-log snapshot cadence (minutes)
    pub snapshot_interval_mins: u32,
    /// Log retention prune cadence (hours)
    pub prune_interval_hours: u32,
    /// High pulse longer than this decodes as a 1 bit (microseconds)
    pub bit_one_threshold_us: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,        // 2/min
            read_attempts: 3,
            retry_delay_ms: 500,
            maintenance_interval_ms: 300_000, // 5 min
            snapshot_interval_mins: 60,
            prune_interval_hours: 24,
            bit_one_threshold_us: 50,
        }
    }
}

/// Where the kernel GPIO interface lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// Root of the sysfs GPIO class directory.
    pub sysfs_root: PathBuf,
    /// Added to every pin number before export (GPIO chip base on newer kernels).
    pub line_offset: u32,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            line_offset: 0,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Hardware ---
    pub channels: Vec<ChannelConfig>,
    pub relays: Vec<RelayConfig>,
    pub gpio: GpioConfig,

    // --- Temperature ---
    pub heating: Vec<HeatingZone>,
    /// Width of the band above target in which a heating relay holds its state (°C)
    pub hysteresis_c: f32,

    // --- Humidity ---
    pub humidity: Option<HumidityConfig>,

    // --- Daylight ---
    pub daylight: Option<DaylightConfig>,

    // --- Housekeeping ---
    /// Operator log entries older than this are pruned
    pub log_retention_months: u32,

    // --- Timing ---
    pub timing: TimingConfig,
}

fn channel(id: u8, pin: PinId, label: &str) -> ChannelConfig {
    ChannelConfig {
        id: ChannelId(id),
        pin,
        label: label.into(),
    }
}

fn relay(id: u8, pin: PinId, label: &str) -> RelayConfig {
    RelayConfig {
        id: RelayId(id),
        pin,
        label: label.into(),
    }
}

fn zone(id: u8, target_c: f32) -> HeatingZone {
    HeatingZone {
        channel: ChannelId(id),
        relay: RelayId(id),
        target_c,
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Hardware
            channels: vec![
                channel(1, pins::SENSOR_1_GPIO, "Nest 1"),
                channel(2, pins::SENSOR_2_GPIO, "Nest 2"),
                channel(3, pins::SENSOR_3_GPIO, "Arena"),
            ],
            relays: vec![
                relay(1, pins::RELAY_1_GPIO, "Heat mat 1"),
                relay(2, pins::RELAY_2_GPIO, "Heat mat 2"),
                relay(3, pins::RELAY_3_GPIO, "Arena heater"),
                relay(4, pins::RELAY_4_GPIO, "Daylight"),
                relay(5, pins::RELAY_5_GPIO, "Mister"),
                relay(6, pins::RELAY_6_GPIO, "Spare"),
            ],
            gpio: GpioConfig::default(),

            // Temperature
            heating: vec![zone(1, 29.0), zone(2, 29.0), zone(3, 29.0)],
            hysteresis_c: 1.0,

            // Humidity
            humidity: Some(HumidityConfig {
                channel: ChannelId(1),
                relay: RelayId(5),
                threshold_pct: 60.0,
                lockout_hours: 6,
                pulse_ms: 1_000,
            }),

            // Daylight
            daylight: Some(DaylightConfig {
                relay: RelayId(4),
                on: "08:00".into(),
                off: "20:00".into(),
            }),

            // Housekeeping
            log_retention_months: 12,

            // Timing
            timing: TimingConfig::default(),
        }
    }
}

/// Who holds a pin, for conflict reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOwner {
    Channel(ChannelId),
    Relay(RelayId),
}

/// Two configured owners share one pin. The later owner is skipped at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConflict {
    pub pin: PinId,
    pub first: PinOwner,
    pub second: PinOwner,
}

impl SystemConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject structurally unusable configs.
    ///
    /// Shared pins and unparseable schedule strings are *not* rejected here:
    /// they degrade one channel, relay or cycle at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.hysteresis_c.is_finite() || self.hysteresis_c < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "hysteresis_c must be a non-negative number",
            ));
        }
        if self.timing.poll_interval_ms == 0 || self.timing.maintenance_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("loop intervals must be non-zero"));
        }
        if self.timing.read_attempts == 0 {
            return Err(ConfigError::ValidationFailed("read_attempts must be at least 1"));
        }
        if self.timing.snapshot_interval_mins == 0 || self.timing.prune_interval_hours == 0 {
            return Err(ConfigError::ValidationFailed(
                "housekeeping intervals must be non-zero",
            ));
        }
        if has_duplicates(self.channels.iter().map(|c| c.id)) {
            return Err(ConfigError::ValidationFailed("duplicate channel id"));
        }
        if has_duplicates(self.relays.iter().map(|r| r.id)) {
            return Err(ConfigError::ValidationFailed("duplicate relay id"));
        }
        for z in &self.heating {
            if !z.target_c.is_finite() {
                return Err(ConfigError::ValidationFailed("heating target must be finite"));
            }
            if !self.has_channel(z.channel) {
                return Err(ConfigError::ValidationFailed(
                    "heating zone references an unknown channel",
                ));
            }
            if !self.has_relay(z.relay) {
                return Err(ConfigError::ValidationFailed(
                    "heating zone references an unknown relay",
                ));
            }
        }
        if has_duplicates(self.heating.iter().map(|z| z.relay)) {
            return Err(ConfigError::ValidationFailed(
                "a relay may belong to only one heating zone",
            ));
        }
        if let Some(h) = &self.humidity {
            if !(0.0..=100.0).contains(&h.threshold_pct) {
                return Err(ConfigError::ValidationFailed(
                    "humidity threshold_pct must be within 0..=100",
                ));
            }
            if h.lockout_hours > MAX_LOCKOUT_HOURS {
                return Err(ConfigError::ValidationFailed(
                    "humidity lockout_hours must be at most one year",
                ));
            }
            if !self.has_channel(h.channel) || !self.has_relay(h.relay) {
                return Err(ConfigError::ValidationFailed(
                    "humidity rule references an unknown channel or relay",
                ));
            }
        }
        if let Some(d) = &self.daylight {
            if !self.has_relay(d.relay) {
                return Err(ConfigError::ValidationFailed(
                    "daylight rule references an unknown relay",
                ));
            }
        }
        Ok(())
    }

    /// Every pin claimed twice, in claim order (relays first, then channels).
    pub fn pin_conflicts(&self) -> Vec<PinConflict> {
        let owners = self
            .relays
            .iter()
            .map(|r| (r.pin, PinOwner::Relay(r.id)))
            .chain(self.channels.iter().map(|c| (c.pin, PinOwner::Channel(c.id))));

        let mut seen: Vec<(PinId, PinOwner)> = Vec::new();
        let mut conflicts = Vec::new();
        for (pin, owner) in owners {
            if let Some(&(_, first)) = seen.iter().find(|(p, _)| *p == pin) {
                conflicts.push(PinConflict {
                    pin,
                    first,
                    second: owner,
                });
            } else {
                seen.push((pin, owner));
            }
        }
        conflicts
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }

    fn has_channel(&self, id: ChannelId) -> bool {
        self.channel(id).is_some()
    }

    fn has_relay(&self, id: RelayId) -> bool {
        self.relays.iter().any(|r| r.id == id)
    }
}

fn has_duplicates<T: PartialEq>(items: impl Iterator<Item = T>) -> bool {
    let items: Vec<T> = items.collect();
    items
        .iter()
        .enumerate()
        .any(|(i, a)| items[i + 1..].contains(a))
}
