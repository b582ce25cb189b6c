//! Time-of-day rules for the maintenance loop.
//!
//! Two independent pieces:
//!
//! - [`DaylightWindow`]: is the lamp supposed to be on right now?
//! - [`Housekeeping`]: is an operator-log snapshot or a retention prune due?
//!
//! Neither touches hardware or storage; the control service acts on the
//! answers.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

use crate::config::TimingConfig;
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════
//  Daylight window
// ═══════════════════════════════════════════════════════════════

/// Lamp-on interval as two wall-clock times.
///
/// `on < off` is an ordinary daytime window `[on, off)`. `on >= off` wraps
/// midnight. `on == off` therefore means "always on".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaylightWindow {
    pub on: NaiveTime,
    pub off: NaiveTime,
}

impl DaylightWindow {
    pub fn new(on: NaiveTime, off: NaiveTime) -> Self {
        Self { on, off }
    }

    /// Parse `HH:MM` / `HH:MM:SS` strings.
    pub fn parse(on: &str, off: &str) -> Result<Self> {
        Ok(Self::new(parse_time_of_day(on)?, parse_time_of_day(off)?))
    }

    /// Whether the lamp should be lit at `now`.
    pub fn is_lit(&self, now: NaiveTime) -> bool {
        if self.on < self.off {
            now >= self.on && now < self.off
        } else {
            // e.g. 20:00..06:00, wraps around midnight
            now >= self.on || now < self.off
        }
    }
}

/// `HH:MM` or `HH:MM:SS`, 24-hour.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| Error::InvalidScheduleFormat(value.to_owned()))
}

// ═══════════════════════════════════════════════════════════════
//  Housekeeping cadence
// ═══════════════════════════════════════════════════════════════

/// Tracks when the hourly snapshot and the daily prune last ran.
///
/// Both are due on the first maintenance tick after start.
#[derive(Debug, Clone)]
pub struct Housekeeping {
    snapshot_every: TimeDelta,
    prune_every: TimeDelta,
    last_snapshot: Option<DateTime<Utc>>,
    last_prune: Option<DateTime<Utc>>,
}

impl Housekeeping {
    pub fn new(snapshot_every: TimeDelta, prune_every: TimeDelta) -> Self {
        Self {
            snapshot_every,
            prune_every,
            last_snapshot: None,
            last_prune: None,
        }
    }

    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self::new(
            TimeDelta::minutes(i64::from(timing.snapshot_interval_mins)),
            TimeDelta::hours(i64::from(timing.prune_interval_hours)),
        )
    }

    /// `true` if a snapshot is due; marks it done.
    pub fn take_snapshot(&mut self, now: DateTime<Utc>) -> bool {
        take(&mut self.last_snapshot, self.snapshot_every, now)
    }

    /// `true` if a prune is due; marks it done.
    pub fn take_prune(&mut self, now: DateTime<Utc>) -> bool {
        take(&mut self.last_prune, self.prune_every, now)
    }
}

fn take(last: &mut Option<DateTime<Utc>>, every: TimeDelta, now: DateTime<Utc>) -> bool {
    let due = last.is_none_or(|t| now - t >= every);
    if due {
        *last = Some(now);
    }
    due
}
