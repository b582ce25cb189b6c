//! Simulated GPIO backend with synthetic DHT22 devices.
//!
//! Used by the test suites and by `terrariumd --simulate`. Relay outputs
//! are recorded in a shared level map. Data lines replay a DHT22 waveform
//! computed from the scripted response, timed from the moment the host
//! releases the line.
//!
//! Two clock modes:
//!
//! - **virtual**: one counter per data line, shared only with that line's
//!   timebase. Every line sample advances it by [`POLL_COST_US`], and
//!   delays advance it without sleeping, so protocol tests are
//!   deterministic and fast, and channels read from different threads do
//!   not stretch each other's pulses.
//! - **real**: `std::time::Instant`, for running the daemon without hardware.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use parking_lot::Mutex;

use crate::app::ports::{GpioBackend, RelayLine, SensorLine};
use crate::error::GpioError;
use crate::model::Measurement;
use crate::pins::PinId;
use crate::sensors::dht22::{self, FRAME_BITS, FRAME_LEN, Timebase};

/// Virtual microseconds consumed by one line sample.
pub const POLL_COST_US: u64 = 1;

// Device timing (datasheet typicals).
const REACTION_US: u32 = 30;
const RESPONSE_LOW_US: u32 = 80;
const RESPONSE_HIGH_US: u32 = 80;
const BIT_LOW_US: u32 = 50;
const ZERO_HIGH_US: u32 = 26;
const ONE_HIGH_US: u32 = 70;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum SimClock {
    Real(Instant),
    Virtual(Arc<AtomicU64>),
}

impl SimClock {
    pub fn virtual_time() -> Self {
        Self::Virtual(Arc::new(AtomicU64::new(0)))
    }

    pub fn real_time() -> Self {
        Self::Real(Instant::now())
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    /// Current time without consuming any.
    pub fn peek_us(&self) -> u64 {
        match self {
            Self::Real(origin) => origin.elapsed().as_micros() as u64,
            Self::Virtual(t) => t.load(Ordering::Relaxed),
        }
    }

    /// Time of one line sample.
    fn sample_us(&self) -> u64 {
        match self {
            Self::Real(origin) => origin.elapsed().as_micros() as u64,
            Self::Virtual(t) => t.fetch_add(POLL_COST_US, Ordering::Relaxed) + POLL_COST_US,
        }
    }
}

impl Timebase for SimClock {
    fn now_us(&mut self) -> u64 {
        self.peek_us()
    }

    fn delay_us(&mut self, us: u32) {
        match self {
            Self::Real(_) => std::thread::sleep(std::time::Duration::from_micros(u64::from(us))),
            Self::Virtual(t) => {
                t.fetch_add(u64::from(us), Ordering::Relaxed);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted sensor
// ---------------------------------------------------------------------------

/// What the device does for one transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimResponse {
    /// Well-formed frame carrying this measurement.
    Reply(Measurement),
    /// Exactly these bytes, checksum included.
    Frame([u8; FRAME_LEN]),
    /// Never answers the wake pulse.
    Silent,
    /// Answers, then stalls high after `bits` data bits.
    Truncated { bits: u8 },
}

struct Script {
    queued: VecDeque<SimResponse>,
    steady: SimResponse,
    transactions: usize,
}

/// Handle for scripting one simulated device.
#[derive(Clone)]
pub struct SimSensor(Arc<Mutex<Script>>);

impl SimSensor {
    pub fn new(steady: SimResponse) -> Self {
        Self(Arc::new(Mutex::new(Script {
            queued: VecDeque::new(),
            steady,
            transactions: 0,
        })))
    }

    /// Response used once the queue is empty.
    pub fn set_steady(&self, response: SimResponse) {
        self.0.lock().steady = response;
    }

    /// Response for the next transaction only.
    pub fn push_once(&self, response: SimResponse) {
        self.0.lock().queued.push_back(response);
    }

    /// Wake pulses seen so far.
    pub fn transactions(&self) -> usize {
        self.0.lock().transactions
    }

    fn next(&self) -> SimResponse {
        let mut s = self.0.lock();
        s.transactions += 1;
        s.queued.pop_front().unwrap_or(s.steady)
    }
}

// ---------------------------------------------------------------------------
// Data line
// ---------------------------------------------------------------------------

/// A stretch of constant level ending `end_us` after release.
#[derive(Debug, Clone, Copy)]
struct Segment {
    high: bool,
    end_us: u32,
}

type Waveform = heapless::Vec<Segment, 96>;

fn waveform(response: SimResponse) -> Waveform {
    let (frame, bits) = match response {
        SimResponse::Silent => return Waveform::new(),
        SimResponse::Reply(m) => (dht22::encode_frame(m), FRAME_BITS),
        SimResponse::Frame(f) => (f, FRAME_BITS),
        SimResponse::Truncated { bits } => ([0u8; FRAME_LEN], bits.min(FRAME_BITS)),
    };

    let mut w = Waveform::new();
    let mut t = 0u32;
    let mut push = |w: &mut Waveform, high: bool, len: u32| {
        t += len;
        // Capacity covers the longest frame: 3 + 2*40 + 1 segments.
        let _ = w.push(Segment { high, end_us: t });
    };

    push(&mut w, true, REACTION_US);
    push(&mut w, false, RESPONSE_LOW_US);
    push(&mut w, true, RESPONSE_HIGH_US);
    for bit in 0..bits {
        let one = frame[usize::from(bit / 8)] & (0x80 >> (bit % 8)) != 0;
        push(&mut w, false, BIT_LOW_US);
        push(&mut w, true, if one { ONE_HIGH_US } else { ZERO_HIGH_US });
    }
    push(&mut w, false, BIT_LOW_US);
    w
}

/// Simulated open-drain data line, optionally with a device attached.
pub struct SimDataLine {
    clock: SimClock,
    sensor: Option<SimSensor>,
    driven_low: bool,
    released_at: u64,
    waveform: Waveform,
}

impl SimDataLine {
    pub fn new(clock: SimClock, sensor: Option<SimSensor>) -> Self {
        Self {
            clock,
            sensor,
            driven_low: false,
            released_at: 0,
            waveform: Waveform::new(),
        }
    }

    pub fn is_released(&self) -> bool {
        !self.driven_low
    }

    fn level(&mut self) -> bool {
        let now = self.clock.sample_us();
        if self.driven_low {
            return false;
        }
        let offset = now.saturating_sub(self.released_at);
        self.waveform
            .iter()
            .find(|s| offset < u64::from(s.end_us))
            .is_none_or(|s| s.high)
    }
}

impl ErrorType for SimDataLine {
    type Error = GpioError;
}

impl OutputPin for SimDataLine {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.driven_low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        // Only a low-to-released transition is a wake pulse.
        if self.driven_low {
            self.driven_low = false;
            self.released_at = self.clock.peek_us();
            self.waveform = self
                .sensor
                .as_ref()
                .map_or_else(Waveform::new, |s| waveform(s.next()));
        }
        Ok(())
    }
}

impl InputPin for SimDataLine {
    fn is_high(&mut self) -> Result<bool, GpioError> {
        Ok(self.level())
    }

    fn is_low(&mut self) -> Result<bool, GpioError> {
        Ok(!self.level())
    }
}

// ---------------------------------------------------------------------------
// Relay output
// ---------------------------------------------------------------------------

type Levels = Arc<Mutex<BTreeMap<PinId, bool>>>;

struct SimOutput {
    pin: PinId,
    levels: Levels,
    failing: Arc<Mutex<BTreeSet<PinId>>>,
}

impl SimOutput {
    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        if self.failing.lock().contains(&self.pin) {
            return Err(GpioError::Write(self.pin));
        }
        self.levels.lock().insert(self.pin, high);
        Ok(())
    }
}

impl ErrorType for SimOutput {
    type Error = GpioError;
}

impl OutputPin for SimOutput {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.write(true)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Simulated GPIO controller.
pub struct SimGpio {
    clock: SimClock,
    line_clocks: Mutex<BTreeMap<PinId, SimClock>>,
    sensors: Mutex<BTreeMap<PinId, SimSensor>>,
    levels: Levels,
    failing: Arc<Mutex<BTreeSet<PinId>>>,
}

impl SimGpio {
    fn with_clock(clock: SimClock) -> Self {
        Self {
            clock,
            line_clocks: Mutex::new(BTreeMap::new()),
            sensors: Mutex::new(BTreeMap::new()),
            levels: Arc::new(Mutex::new(BTreeMap::new())),
            failing: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn virtual_time() -> Self {
        Self::with_clock(SimClock::virtual_time())
    }

    pub fn real_time() -> Self {
        Self::with_clock(SimClock::real_time())
    }

    /// Clock shared by `pin`'s data line and its timebase. In virtual mode
    /// every pin gets its own counter.
    pub fn line_clock(&self, pin: PinId) -> SimClock {
        if !self.clock.is_virtual() {
            return self.clock.clone();
        }
        self.line_clocks
            .lock()
            .entry(pin)
            .or_insert_with(SimClock::virtual_time)
            .clone()
    }

    /// Put a device on `pin`. Lines opened later on that pin talk to it.
    pub fn attach_sensor(&self, pin: PinId, steady: SimResponse) -> SimSensor {
        let sensor = SimSensor::new(steady);
        self.sensors.lock().insert(pin, sensor.clone());
        sensor
    }

    /// Last level written to an output pin.
    pub fn output_level(&self, pin: PinId) -> Option<bool> {
        self.levels.lock().get(&pin).copied()
    }

    /// Make writes to `pin` fail (or succeed again).
    pub fn fail_writes(&self, pin: PinId, fail: bool) {
        let mut failing = self.failing.lock();
        if fail {
            failing.insert(pin);
        } else {
            failing.remove(&pin);
        }
    }
}

impl GpioBackend for SimGpio {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn open_output(&self, pin: PinId) -> Result<RelayLine, GpioError> {
        self.levels.lock().insert(pin, false);
        Ok(Box::new(SimOutput {
            pin,
            levels: self.levels.clone(),
            failing: self.failing.clone(),
        }))
    }

    fn open_data_line(&self, pin: PinId) -> Result<SensorLine, GpioError> {
        let sensor = self.sensors.lock().get(&pin).cloned();
        Ok(Box::new(SimDataLine::new(self.line_clock(pin), sensor)))
    }

    fn timebase(&self, pin: PinId) -> Box<dyn Timebase + Send> {
        Box::new(self.line_clock(pin))
    }
}
