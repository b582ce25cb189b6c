//! Unified error types for the enclosure controller.
//!
//! A single `Error` enum that every subsystem converts into, so the loops
//! and the host binary handle faults uniformly. Sensor and GPIO errors are
//! `Copy` so they can travel back from reader threads without allocation.

use core::fmt;

use crate::model::RelayId;
use crate::pins::PinId;

// ---------------------------------------------------------------------------
// Top-level controller error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A single-wire sensor transaction failed.
    Sensor(SensorError),
    /// A relay command failed.
    Actuator(ActuatorError),
    /// The pin is already claimed by another channel or relay.
    PinConflict(PinId),
    /// The storage collaborator rejected a write or query.
    PersistenceFailure(StorageError),
    /// A daylight on/off string is not a valid time of day.
    InvalidScheduleFormat(String),
    /// The GPIO subsystem could not be initialised.
    ControllerUnavailable(String),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::PinConflict(pin) => write!(f, "pin conflict: {pin} already claimed"),
            Self::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
            Self::InvalidScheduleFormat(value) => {
                write!(f, "invalid schedule format: {value:?} (expected HH:MM)")
            }
            Self::ControllerUnavailable(msg) => write!(f, "GPIO controller unavailable: {msg}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

/// Where in a transaction a bounded wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// The device never answered the wake pulse.
    Response,
    /// The line stalled while clocking out data bit `n` (0..40).
    Bit(u8),
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response => write!(f, "response"),
            Self::Bit(n) => write!(f, "bit {n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// A bounded edge wait expired.
    ProtocolTimeout(WaitPhase),
    /// Byte 4 does not equal the 8-bit sum of bytes 0..4.
    ChecksumMismatch { computed: u8, received: u8 },
    /// The data line itself returned an error.
    Line(GpioError),
    /// The channel worker delivered nothing before the tick deadline.
    NoReport,
    /// The channel reader panicked; the channel is out of service.
    ReaderLost,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolTimeout(phase) => write!(f, "protocol timeout waiting for {phase}"),
            Self::ChecksumMismatch { computed, received } => write!(
                f,
                "checksum mismatch (computed 0x{computed:02X}, received 0x{received:02X})"
            ),
            Self::Line(e) => write!(f, "data line: {e}"),
            Self::NoReport => f.write_str("no result before the tick deadline"),
            Self::ReaderLost => f.write_str("channel reader lost"),
        }
    }
}

impl std::error::Error for SensorError {}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// GPIO errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioError {
    /// Exporting or configuring the pin failed.
    Setup(PinId),
    /// Reading the pin level failed.
    Read(PinId),
    /// Driving the pin failed.
    Write(PinId),
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(pin) => write!(f, "{pin} setup failed"),
            Self::Read(pin) => write!(f, "{pin} read failed"),
            Self::Write(pin) => write!(f, "{pin} write failed"),
        }
    }
}

impl std::error::Error for GpioError {}

/// A pin that cannot even be opened means the controller is unusable for it.
impl From<GpioError> for Error {
    fn from(e: GpioError) -> Self {
        Self::ControllerUnavailable(e.to_string())
    }
}

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// No relay with this id was opened.
    UnknownRelay(RelayId),
    /// The physical write failed; in-memory state was left unchanged.
    WriteFailed(RelayId, GpioError),
    /// The bank has already been shut down.
    Released,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRelay(id) => write!(f, "unknown relay {id}"),
            Self::WriteFailed(id, e) => write!(f, "relay {id} write failed: {e}"),
            Self::Released => write!(f, "relay bank already released"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors from [`StoragePort`](crate::app::ports::StoragePort) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend is unreachable or refused the connection.
    Unavailable,
    /// A record could not be encoded or decoded.
    Serialization(String),
    /// Generic I/O error.
    Io(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "storage unavailable"),
            Self::Serialization(msg) => write!(f, "serialization: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::PersistenceFailure(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(String),
    /// The config file is not valid JSON for [`SystemConfig`](crate::config::SystemConfig).
    Parse(String),
    /// A field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_phase() {
        let e = Error::from(SensorError::ProtocolTimeout(WaitPhase::Bit(17)));
        assert_eq!(e.to_string(), "sensor: protocol timeout waiting for bit 17");
    }

    #[test]
    fn checksum_display_is_hex() {
        let e = SensorError::ChecksumMismatch {
            computed: 0x0A,
            received: 0xFF,
        };
        assert_eq!(
            e.to_string(),
            "checksum mismatch (computed 0x0A, received 0xFF)"
        );
    }

    #[test]
    fn storage_errors_become_persistence_failures() {
        let e: Error = StorageError::Unavailable.into();
        assert!(matches!(e, Error::PersistenceFailure(StorageError::Unavailable)));
    }
}
