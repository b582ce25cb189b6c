//! Domain records shared by acquisition, control and the storage port.
//!
//! Everything here is plain data: cheap to clone, serde-friendly, and free
//! of hardware handles.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Sensor channel id (1-based, as printed on the enclosure wiring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u8);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relay id (1-based, matches the relay board silkscreen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayId(pub u8);

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Sensor data
// ---------------------------------------------------------------------------

/// One decoded sensor transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

/// A reading emitted by the acquisition path.
///
/// `valid == false` means the values were copied from the channel's last
/// good reading because this tick's transaction failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub channel: ChannelId,
    pub timestamp: DateTime<Utc>,
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub valid: bool,
}

impl Reading {
    pub fn fresh(channel: ChannelId, timestamp: DateTime<Utc>, m: Measurement) -> Self {
        Self {
            channel,
            timestamp,
            temperature_c: Some(m.temperature_c),
            humidity_pct: Some(m.humidity_pct),
            valid: true,
        }
    }

    /// Temperature usable for control decisions. Fallback values never drive relays.
    pub fn live_temperature(&self) -> Option<f32> {
        self.temperature_c.filter(|_| self.valid)
    }

    /// Humidity usable for control decisions.
    pub fn live_humidity(&self) -> Option<f32> {
        self.humidity_pct.filter(|_| self.valid)
    }
}

// ---------------------------------------------------------------------------
// Actuation audit
// ---------------------------------------------------------------------------

/// Why a relay changed state. Labels are stable and stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    #[serde(rename = "Temperature Threshold")]
    TemperatureThreshold,
    #[serde(rename = "Sensor Invalid")]
    SensorInvalid,
    #[serde(rename = "Humidity Threshold")]
    HumidityThreshold,
    #[serde(rename = "Humidity Pulse Complete")]
    HumidityPulseComplete,
    #[serde(rename = "Scheduler")]
    Scheduler,
    #[serde(rename = "Manual Override")]
    ManualOverride,
}

impl Trigger {
    pub const fn label(self) -> &'static str {
        match self {
            Self::TemperatureThreshold => "Temperature Threshold",
            Self::SensorInvalid => "Sensor Invalid",
            Self::HumidityThreshold => "Humidity Threshold",
            Self::HumidityPulseComplete => "Humidity Pulse Complete",
            Self::Scheduler => "Scheduler",
            Self::ManualOverride => "Manual Override",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sensor context captured at the moment a relay was switched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceContext {
    pub channel: ChannelId,
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
}

impl SourceContext {
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            channel: reading.channel,
            temperature_c: reading.temperature_c,
            humidity_pct: reading.humidity_pct,
        }
    }
}

/// Append-only audit row written on every relay state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationRecord {
    pub timestamp: DateTime<Utc>,
    pub relay: RelayId,
    pub state: bool,
    pub trigger: Trigger,
    pub source: Option<SourceContext>,
}

// ---------------------------------------------------------------------------
// Operator log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    StateChange,
    HourlySnapshot,
}

/// Per-channel values carried by a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: ChannelId,
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
}

/// Human-oriented log row, subject to retention pruning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub details: String,
    pub relay: Option<RelayId>,
    pub relay_state: Option<bool>,
    pub snapshot: Vec<ChannelSnapshot>,
}

impl LogEntry {
    pub fn state_change(record: &ActuationRecord) -> Self {
        let snapshot = record
            .source
            .map(|s| ChannelSnapshot {
                channel: s.channel,
                temperature_c: s.temperature_c,
                humidity_pct: s.humidity_pct,
            })
            .into_iter()
            .collect();
        Self {
            timestamp: record.timestamp,
            kind: LogKind::StateChange,
            details: format!(
                "Relay {} turned {} - Trigger: {}",
                record.relay,
                if record.state { "ON" } else { "OFF" },
                record.trigger
            ),
            relay: Some(record.relay),
            relay_state: Some(record.state),
            snapshot,
        }
    }

    pub fn hourly_snapshot(timestamp: DateTime<Utc>, latest: &[Reading]) -> Self {
        Self {
            timestamp,
            kind: LogKind::HourlySnapshot,
            details: "Hourly sensor snapshot".into(),
            relay: None,
            relay_state: None,
            snapshot: latest
                .iter()
                .map(|r| ChannelSnapshot {
                    channel: r.channel,
                    temperature_c: r.temperature_c,
                    humidity_pct: r.humidity_pct,
                })
                .collect(),
        }
    }
}
