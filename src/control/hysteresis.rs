//! Two-point hysteresis for heating relays.
//!
//! ```text
//!          OFF ──(t < target)──▶ ON
//!           ▲                    │
//!           └─(t >= target+band)─┘
//! ```
//!
//! Lower temperature means relay ON. A cooling relay would need the
//! comparisons inverted; nothing here does that implicitly.

use crate::config::HeatingZone;

/// Threshold pair for one heating relay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    pub target_c: f32,
    pub band_c: f32,
}

impl Hysteresis {
    pub fn new(target_c: f32, band_c: f32) -> Self {
        Self { target_c, band_c }
    }

    pub fn for_zone(zone: &HeatingZone, band_c: f32) -> Self {
        Self::new(zone.target_c, band_c)
    }

    /// Desired relay state given the current one.
    pub fn decide(&self, temperature_c: Option<f32>, currently_on: bool) -> bool {
        decide(temperature_c, self.target_c, self.band_c, currently_on)
    }
}

/// Desired heating relay state.
///
/// An absent temperature always means OFF.
pub fn decide(temperature_c: Option<f32>, target_c: f32, band_c: f32, currently_on: bool) -> bool {
    let Some(t) = temperature_c else {
        return false;
    };
    if currently_on {
        t < target_c + band_c
    } else {
        t < target_c
    }
}
