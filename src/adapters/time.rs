//! Wall-clock adapters.
//!
//! - [`SystemClock`]: the host's real clock and local timezone.
//! - [`ManualClock`]: a settable clock for tests and simulation. Local
//!   time of day is taken from its UTC value.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::app::ports::Clock;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_time(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

/// 2026-01-01T12:00:00Z
const DEFAULT_EPOCH_SECS: i64 = 1_767_268_800;

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::from_timestamp(DEFAULT_EPOCH_SECS, 0).unwrap_or(DateTime::UNIX_EPOCH))
    }
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    /// Move to `time` on the current date.
    pub fn set_time_of_day(&self, time: NaiveTime) {
        let mut now = self.now.lock();
        *now = now.date_naive().and_time(time).and_utc();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn local_time(&self) -> NaiveTime {
        self.now.lock().time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::default();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(TimeDelta::minutes(5));
        assert_eq!(clock.now() - t0, TimeDelta::minutes(5));
    }

    #[test]
    fn time_of_day_keeps_the_date() {
        let clock = ManualClock::default();
        let date = clock.now().date_naive();
        let t = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        clock.set_time_of_day(t);
        assert_eq!(clock.local_time(), t);
        assert_eq!(clock.now().date_naive(), date);
    }
}
