//! DHT22 / AM2302 single-wire temperature + humidity sensor driver.
//!
//! One transaction:
//!
//! ```text
//!  host  ▔▔▔╲_______5 ms_______╱▔▔ (release, pull-up)
//!  dev                            ╲__80µs__╱▔▔80µs▔▔╲_50µs_╱▔26|70µs▔╲_50µs_╱▔ ... ×40
//! ```
//!
//! The host drives the line low to wake the device, releases it, waits for
//! the device's response pulse, then times 40 high pulses: ~26 µs is a 0,
//! ~70 µs is a 1. Every wait is a bounded spin against the [`Timebase`]
//! deadline, so a dead or disconnected sensor costs at most
//! [`ProtocolTiming::response_timeout_us`] and never hangs the caller.
//!
//! Byte layout: `[RH hi, RH lo, T hi, T lo, checksum]`, RH and T in tenths,
//! bit 7 of `T hi` is the temperature sign.

use embedded_hal::digital::{InputPin, OutputPin};

use crate::error::{GpioError, SensorError, WaitPhase};
use crate::model::Measurement;

use super::SensorReader;

/// Payload length including the checksum byte.
pub const FRAME_LEN: usize = 5;

/// Number of data bits clocked out per transaction.
pub const FRAME_BITS: u8 = (FRAME_LEN * 8) as u8;

// ---------------------------------------------------------------------------
// Timebase
// ---------------------------------------------------------------------------

/// Monotonic microsecond clock plus a blocking delay.
///
/// Protocol timing must come from the same clock domain the line is
/// sampled in, so each GPIO backend supplies its own.
pub trait Timebase {
    fn now_us(&mut self) -> u64;
    fn delay_us(&mut self, us: u32);
}

impl<T: Timebase + ?Sized> Timebase for Box<T> {
    fn now_us(&mut self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us);
    }
}

/// Wall-time [`Timebase`] backed by `std::time::Instant`.
pub struct StdTimebase {
    origin: std::time::Instant,
}

impl Default for StdTimebase {
    fn default() -> Self {
        Self::new()
    }
}

impl StdTimebase {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Timebase for StdTimebase {
    fn now_us(&mut self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Protocol timing bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    /// Host wake pulse (datasheet: 1–10 ms).
    pub wake_low_us: u32,
    /// Bound on the device's response after release.
    pub response_timeout_us: u64,
    /// Bound on each data bit.
    pub bit_timeout_us: u64,
    /// High pulses longer than this decode as 1.
    pub bit_one_threshold_us: u64,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            wake_low_us: 5_000,
            response_timeout_us: 100_000,
            bit_timeout_us: 200_000,
            bit_one_threshold_us: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

/// 8-bit sum of the four data bytes.
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Validate and decode a raw payload.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<Measurement, SensorError> {
    let computed = checksum(frame);
    if computed != frame[4] {
        return Err(SensorError::ChecksumMismatch {
            computed,
            received: frame[4],
        });
    }

    let humidity_raw = u16::from_be_bytes([frame[0], frame[1]]);
    let temp_raw = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]);
    let magnitude = temp_raw as f32 / 10.0;

    Ok(Measurement {
        temperature_c: if frame[2] & 0x80 != 0 { -magnitude } else { magnitude },
        humidity_pct: humidity_raw as f32 / 10.0,
    })
}

/// Inverse of [`decode_frame`]; used by the simulated device.
pub fn encode_frame(m: Measurement) -> [u8; FRAME_LEN] {
    let humidity = (m.humidity_pct * 10.0).round().clamp(0.0, f32::from(u16::MAX)) as u16;
    let magnitude = (m.temperature_c.abs() * 10.0).round().clamp(0.0, 0x7FFF as f32) as u16;
    let [h_hi, h_lo] = humidity.to_be_bytes();
    let [mut t_hi, t_lo] = magnitude.to_be_bytes();
    if m.temperature_c < 0.0 && magnitude != 0 {
        t_hi |= 0x80;
    }
    let mut frame = [h_hi, h_lo, t_hi, t_lo, 0];
    frame[4] = checksum(&frame);
    frame
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// DHT22 driver over one exclusively owned data line.
pub struct Dht22<L, T> {
    line: L,
    timebase: T,
    timing: ProtocolTiming,
}

impl<L, T> Dht22<L, T>
where
    L: InputPin<Error = GpioError> + OutputPin<Error = GpioError>,
    T: Timebase,
{
    pub fn new(line: L, timebase: T) -> Self {
        Self::with_timing(line, timebase, ProtocolTiming::default())
    }

    pub fn with_timing(line: L, timebase: T, timing: ProtocolTiming) -> Self {
        Self {
            line,
            timebase,
            timing,
        }
    }

    /// Run exactly one transaction. Retry policy belongs to the caller.
    pub fn transaction(&mut self) -> Result<Measurement, SensorError> {
        let frame = self.read_frame();
        // Leave the line released for the pull-up whatever happened.
        let released = self.line.set_high().map_err(SensorError::Line);
        let frame = frame?;
        released?;
        decode_frame(&frame)
    }

    /// Hand back the line, e.g. to release its claim.
    pub fn into_inner(self) -> (L, T) {
        (self.line, self.timebase)
    }

    fn read_frame(&mut self) -> Result<[u8; FRAME_LEN], SensorError> {
        // Wake: drive low, then release.
        self.line.set_low().map_err(SensorError::Line)?;
        self.timebase.delay_us(self.timing.wake_low_us);
        self.line.set_high().map_err(SensorError::Line)?;

        // Response: device pulls low ~80 µs, then high ~80 µs.
        let deadline = self.timebase.now_us() + self.timing.response_timeout_us;
        self.wait_for(false, deadline, WaitPhase::Response)?;
        self.wait_for(true, deadline, WaitPhase::Response)?;

        let mut frame = [0u8; FRAME_LEN];
        for bit in 0..FRAME_BITS {
            let phase = WaitPhase::Bit(bit);
            let deadline = self.timebase.now_us() + self.timing.bit_timeout_us;
            self.wait_for(false, deadline, phase)?;
            let rise = self.wait_for(true, deadline, phase)?;
            let fall = self.wait_for(false, deadline, phase)?;

            if fall.saturating_sub(rise) > self.timing.bit_one_threshold_us {
                frame[usize::from(bit / 8)] |= 0x80 >> (bit % 8);
            }
        }
        Ok(frame)
    }

    /// Spin until the line reads `high`, returning the time it was seen.
    fn wait_for(&mut self, high: bool, deadline_us: u64, phase: WaitPhase) -> Result<u64, SensorError> {
        loop {
            let level = self.line.is_high().map_err(SensorError::Line)?;
            let now = self.timebase.now_us();
            if level == high {
                return Ok(now);
            }
            if now >= deadline_us {
                return Err(SensorError::ProtocolTimeout(phase));
            }
        }
    }
}

impl<L, T> SensorReader for Dht22<L, T>
where
    L: InputPin<Error = GpioError> + OutputPin<Error = GpioError> + Send,
    T: Timebase + Send,
{
    fn read(&mut self) -> Result<Measurement, SensorError> {
        self.transaction()
    }

    fn pause(&mut self, duration: std::time::Duration) {
        let us = u32::try_from(duration.as_micros()).unwrap_or(u32::MAX);
        self.timebase.delay_us(us);
    }
}
