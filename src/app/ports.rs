//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlService (domain)
//! ```
//!
//! Driven adapters (GPIO backends, storage, notification sinks, clocks)
//! implement these traits. The [`ControlService`](super::service::ControlService)
//! holds them as shared trait objects because the acquisition loop, the
//! maintenance loop and the manual-override path all reach them.

use chrono::{DateTime, NaiveTime, Utc};
use embedded_hal::digital::{InputPin, OutputPin};

use crate::config::SystemConfig;
use crate::error::{GpioError, StorageError};
use crate::model::{ActuationRecord, LogEntry, Reading};
use crate::pins::PinId;
use crate::sensors::dht22::Timebase;

use super::events::Notification;

// ───────────────────────────────────────────────────────────────
// GPIO backend (driven adapter: domain ↔ pins)
// ───────────────────────────────────────────────────────────────

/// Open-drain single-wire line: `set_low` drives, `set_high` releases to
/// the pull-up, `is_high` samples.
pub trait DataLine: InputPin + OutputPin + Send {}

impl<T: InputPin + OutputPin + Send + ?Sized> DataLine for T {}

/// Relay coil output. `set_high` energises.
pub type RelayLine = Box<dyn OutputPin<Error = GpioError> + Send>;

/// Single-wire sensor line.
pub type SensorLine = Box<dyn DataLine<Error = GpioError>>;

/// Opens pins on one GPIO controller.
///
/// Backends do not track ownership; [`Gpio`](crate::drivers::gpio::Gpio)
/// does that on top of them.
pub trait GpioBackend: Send + Sync {
    /// Short human name for logs ("sysfs", "sim").
    fn name(&self) -> &'static str;

    /// Configure `pin` as a push-pull output, initially low.
    fn open_output(&self, pin: PinId) -> Result<RelayLine, GpioError>;

    /// Configure `pin` as a released single-wire data line.
    fn open_data_line(&self, pin: PinId) -> Result<SensorLine, GpioError>;

    /// Monotonic clock matching the sampling domain of `pin`'s data line.
    fn timebase(&self, pin: PinId) -> Box<dyn Timebase + Send>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ persistence)
// ───────────────────────────────────────────────────────────────

/// Persistence collaborator for settings, readings, relay history and the
/// operator log.
///
/// Callers treat every error as non-fatal: it is logged and the control
/// loop carries on with in-memory state.
pub trait StoragePort: Send + Sync {
    fn upsert_config(&self, config: &SystemConfig) -> Result<(), StorageError>;

    /// `Ok(None)` on first start.
    fn load_config(&self) -> Result<Option<SystemConfig>, StorageError>;

    fn append_reading(&self, reading: &Reading) -> Result<(), StorageError>;

    fn append_actuation(&self, record: &ActuationRecord) -> Result<(), StorageError>;

    fn append_log(&self, entry: &LogEntry) -> Result<(), StorageError>;

    /// Most recent stored reading per channel, ordered by channel id.
    fn latest_readings(&self) -> Result<Vec<Reading>, StorageError>;

    fn logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<LogEntry>, StorageError>;

    /// Returns how many entries were removed.
    fn delete_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Notification port (driven adapter: domain → observers)
// ───────────────────────────────────────────────────────────────

/// The domain broadcasts [`Notification`]s through this port.
///
/// Fire-and-forget: implementations must not block and have no way to
/// report failure back into the control loop.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall-clock source. Monotonic protocol timing uses [`Timebase`] instead.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local time of day, for the daylight window.
    fn local_time(&self) -> NaiveTime;
}
