//! GPIO pin assignments for the enclosure controller board.
//!
//! Default wiring for a Raspberry Pi header, expressed as BCM line numbers
//! (the numbering the kernel GPIO interface uses). The config file may
//! override every assignment; these constants only seed
//! [`SystemConfig::default`](crate::config::SystemConfig).

use core::fmt;

use serde::{Deserialize, Serialize};

/// A GPIO line number as understood by the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub u32);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Sensors (DHT22, single-wire, external 10 kΩ pull-up)
// ---------------------------------------------------------------------------

/// Nest 1 hide sensor. Also the designated humidity channel.
pub const SENSOR_1_GPIO: PinId = PinId(23);
/// Nest 2 hide sensor.
pub const SENSOR_2_GPIO: PinId = PinId(24);
/// Open arena sensor.
pub const SENSOR_3_GPIO: PinId = PinId(25);

// ---------------------------------------------------------------------------
// Relay board (active HIGH, 6 channels)
// ---------------------------------------------------------------------------

/// Heat mat under nest 1 (header pin 29).
pub const RELAY_1_GPIO: PinId = PinId(5);
/// Heat mat under nest 2 (header pin 31).
pub const RELAY_2_GPIO: PinId = PinId(6);
/// Ceramic heater over the arena (header pin 33).
pub const RELAY_3_GPIO: PinId = PinId(13);
/// Daylight lamp (header pin 35).
pub const RELAY_4_GPIO: PinId = PinId(19);
/// Misting pump pulse (header pin 37).
pub const RELAY_5_GPIO: PinId = PinId(26);
/// Spare channel, wired but not driven by any rule (header pin 40).
pub const RELAY_6_GPIO: PinId = PinId(21);
