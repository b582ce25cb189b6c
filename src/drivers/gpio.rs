//! The process-wide GPIO controller handle.
//!
//! Created once at startup and passed by reference to everything that
//! needs pins. It wraps one [`GpioBackend`] and enforces exclusive pin
//! ownership: a claim returns a guard that releases the pin when dropped.
//!
//! Without a backend (controller failed to initialise) the handle runs in
//! software-only mode: every claim fails with `ControllerUnavailable` and
//! callers fall back to tracking state in memory.

use std::collections::BTreeSet;
use std::sync::Arc;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use log::debug;
use parking_lot::Mutex;

use crate::app::ports::{GpioBackend, RelayLine, SensorLine};
use crate::error::{Error, GpioError};
use crate::pins::PinId;
use crate::sensors::dht22::{StdTimebase, Timebase};

#[derive(Clone, Default)]
struct Claims(Arc<Mutex<BTreeSet<PinId>>>);

impl Claims {
    fn take(&self, pin: PinId) -> Result<ClaimToken, Error> {
        if self.0.lock().insert(pin) {
            Ok(ClaimToken {
                pin,
                claims: self.clone(),
            })
        } else {
            Err(Error::PinConflict(pin))
        }
    }
}

/// Releases the pin on drop.
struct ClaimToken {
    pin: PinId,
    claims: Claims,
}

impl Drop for ClaimToken {
    fn drop(&mut self) {
        self.claims.0.lock().remove(&self.pin);
        debug!("{} released", self.pin);
    }
}

/// Shared handle to the GPIO controller.
#[derive(Clone)]
pub struct Gpio {
    backend: Option<Arc<dyn GpioBackend>>,
    claims: Claims,
}

impl Gpio {
    pub fn new(backend: Arc<dyn GpioBackend>) -> Self {
        Self {
            backend: Some(backend),
            claims: Claims::default(),
        }
    }

    /// No controller: relays are tracked in memory only, sensors cannot be read.
    pub fn software_only() -> Self {
        Self {
            backend: None,
            claims: Claims::default(),
        }
    }

    pub fn is_software_only(&self) -> bool {
        self.backend.is_none()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |b| b.name())
    }

    pub fn is_claimed(&self, pin: PinId) -> bool {
        self.claims.0.lock().contains(&pin)
    }

    /// Claim `pin` as a relay output (initially low).
    pub fn claim_output(&self, pin: PinId) -> Result<ClaimedOutput, Error> {
        let backend = self.backend()?;
        let token = self.claims.take(pin)?;
        let line = backend.open_output(pin).map_err(Error::from)?;
        Ok(ClaimedOutput { line, _claim: token })
    }

    /// Claim `pin` as a single-wire data line (released).
    pub fn claim_data_line(&self, pin: PinId) -> Result<ClaimedLine, Error> {
        let backend = self.backend()?;
        let token = self.claims.take(pin)?;
        let line = backend.open_data_line(pin).map_err(Error::from)?;
        Ok(ClaimedLine { line, _claim: token })
    }

    /// Protocol clock for the data line on `pin`.
    pub fn timebase(&self, pin: PinId) -> Box<dyn Timebase + Send> {
        match &self.backend {
            Some(b) => b.timebase(pin),
            None => Box::new(StdTimebase::new()),
        }
    }

    fn backend(&self) -> Result<&Arc<dyn GpioBackend>, Error> {
        self.backend
            .as_ref()
            .ok_or_else(|| Error::ControllerUnavailable("software-only mode".into()))
    }
}

// ---------------------------------------------------------------------------
// Claimed pins
// ---------------------------------------------------------------------------

/// A relay output that owns its pin claim.
pub struct ClaimedOutput {
    line: RelayLine,
    _claim: ClaimToken,
}

impl ErrorType for ClaimedOutput {
    type Error = GpioError;
}

impl OutputPin for ClaimedOutput {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.line.set_low()
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.line.set_high()
    }
}

/// A single-wire data line that owns its pin claim.
pub struct ClaimedLine {
    line: SensorLine,
    _claim: ClaimToken,
}

impl ErrorType for ClaimedLine {
    type Error = GpioError;
}

impl OutputPin for ClaimedLine {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.line.set_low()
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.line.set_high()
    }
}

impl InputPin for ClaimedLine {
    fn is_high(&mut self) -> Result<bool, GpioError> {
        self.line.is_high()
    }

    fn is_low(&mut self) -> Result<bool, GpioError> {
        self.line.is_low()
    }
}
