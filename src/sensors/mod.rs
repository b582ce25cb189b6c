//! Sensor subsystem: the DHT22 driver plus the acquisition rules around it.
//!
//! Per channel and per tick the acquisition path makes one decision:
//!
//! | transaction outcome        | cache   | emitted reading          | persisted |
//! |----------------------------|---------|--------------------------|-----------|
//! | success (any attempt)      | updated | fresh, `valid = true`    | yes       |
//! | all attempts failed        | present | cached values, `valid = false` | no  |
//! | all attempts failed        | empty   | nothing                  | no        |
//!
//! The cache is only ever overwritten by a successful decode and is never
//! cleared.

pub mod dht22;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::config::{ChannelConfig, TimingConfig};
use crate::drivers::gpio::Gpio;
use crate::error::SensorError;
use crate::model::{ChannelId, Measurement, Reading};

use dht22::{Dht22, ProtocolTiming};

/// One single-wire sensor that can run a transaction and wait between attempts.
pub trait SensorReader: Send {
    /// Exactly one transaction.
    fn read(&mut self) -> Result<Measurement, SensorError>;

    /// Block between attempts, in the reader's own time domain.
    fn pause(&mut self, duration: Duration);
}

/// Bounded retry within one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl From<&TimingConfig> for RetryPolicy {
    fn from(t: &TimingConfig) -> Self {
        Self {
            attempts: t.read_attempts,
            delay: Duration::from_millis(t.retry_delay_ms),
        }
    }
}

/// Try up to `policy.attempts` transactions, returning the first success or
/// the last error.
pub fn read_with_retry<R: SensorReader + ?Sized>(
    reader: &mut R,
    policy: RetryPolicy,
) -> Result<Measurement, SensorError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match reader.read() {
            Ok(m) => return Ok(m),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                reader.pause(policy.delay);
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Last-good cache
// ---------------------------------------------------------------------------

/// Outcome of one channel's tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    /// Fresh decode: persist and forward.
    Fresh(Reading),
    /// Degraded: cached values with `valid = false`. Never persisted.
    Fallback(Reading),
    /// No decode and nothing cached.
    NoData,
}

impl Settled {
    pub fn reading(&self) -> Option<&Reading> {
        match self {
            Self::Fresh(r) | Self::Fallback(r) => Some(r),
            Self::NoData => None,
        }
    }
}

/// Most recent valid reading per channel.
#[derive(Debug, Default)]
pub struct LastGoodCache {
    readings: BTreeMap<ChannelId, Reading>,
}

impl LastGoodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one tick's transaction outcome for `channel`.
    pub fn settle(
        &mut self,
        channel: ChannelId,
        outcome: Result<Measurement, SensorError>,
        now: DateTime<Utc>,
    ) -> Settled {
        match outcome {
            Ok(m) => {
                let reading = Reading::fresh(channel, now, m);
                self.readings.insert(channel, reading.clone());
                Settled::Fresh(reading)
            }
            Err(e) => match self.readings.get(&channel) {
                Some(cached) => {
                    warn!("channel {}: {} - using cached reading", channel, e);
                    Settled::Fallback(Reading {
                        channel,
                        timestamp: now,
                        temperature_c: cached.temperature_c,
                        humidity_pct: cached.humidity_pct,
                        valid: false,
                    })
                }
                None => {
                    warn!("channel {}: {} - no cached reading", channel, e);
                    Settled::NoData
                }
            },
        }
    }

    pub fn get(&self, channel: ChannelId) -> Option<&Reading> {
        self.readings.get(&channel)
    }
}

// ---------------------------------------------------------------------------
// Channel readers
// ---------------------------------------------------------------------------

/// A configured channel and the reader that owns its pin.
///
/// The runtime moves the reader into the channel's worker thread, so the
/// pin is never shared.
pub struct ChannelSlot {
    pub config: ChannelConfig,
    pub reader: Option<Box<dyn SensorReader>>,
}

/// Claim every configured channel's pin and build its reader.
///
/// Channels whose pin is already claimed (or that cannot be opened) are
/// logged and left out.
pub fn open_channels(gpio: &Gpio, channels: &[ChannelConfig], timing: &TimingConfig) -> Vec<ChannelSlot> {
    let protocol = ProtocolTiming {
        bit_one_threshold_us: u64::from(timing.bit_one_threshold_us),
        ..ProtocolTiming::default()
    };

    channels
        .iter()
        .filter_map(|cfg| match gpio.claim_data_line(cfg.pin) {
            Ok(line) => {
                let dht = Dht22::with_timing(line, gpio.timebase(cfg.pin), protocol);
                Some(ChannelSlot {
                    config: cfg.clone(),
                    reader: Some(Box::new(dht) as Box<dyn SensorReader>),
                })
            }
            Err(e) => {
                warn!("channel {} ({}) skipped: {}", cfg.id, cfg.label, e);
                None
            }
        })
        .collect()
}
