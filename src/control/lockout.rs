//! Humidity pulse with cooldown.
//!
//! ```text
//!   Unlocked ──(humidity < threshold)──▶ Locked { expires_at = now + L }
//!      ▲                                        │
//!      └──────────(checked at now >= expires_at)┘
//! ```
//!
//! Expiry is evaluated lazily on the next check; nothing runs a timer.
//! Firing a pulse is the caller's job: [`HumidityLockout::check`] only
//! says whether one is due and moves the state.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::info;
use serde::Serialize;

use crate::config::HumidityConfig;
use crate::model::{ChannelId, RelayId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockoutPhase {
    Unlocked,
    Locked { expires_at: DateTime<Utc> },
}

/// Snapshot of the lockout, for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LockoutState {
    pub channel: ChannelId,
    pub relay: RelayId,
    pub phase: LockoutPhase,
    pub last_triggered: Option<DateTime<Utc>>,
}

impl LockoutState {
    pub fn is_locked(&self) -> bool {
        matches!(self.phase, LockoutPhase::Locked { .. })
    }
}

pub struct HumidityLockout {
    rule: HumidityConfig,
    phase: LockoutPhase,
    last_triggered: Option<DateTime<Utc>>,
}

impl HumidityLockout {
    pub fn new(rule: HumidityConfig) -> Self {
        Self {
            rule,
            phase: LockoutPhase::Unlocked,
            last_triggered: None,
        }
    }

    pub fn rule(&self) -> &HumidityConfig {
        &self.rule
    }

    pub fn state(&self) -> LockoutState {
        LockoutState {
            channel: self.rule.channel,
            relay: self.rule.relay,
            phase: self.phase,
            last_triggered: self.last_triggered,
        }
    }

    pub fn lockout(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.rule.lockout_hours))
    }

    pub fn pulse(&self) -> Duration {
        Duration::from_millis(self.rule.pulse_ms)
    }

    /// Evaluate one humidity value. Returns `true` when a pulse is due now;
    /// the lockout is already engaged when this returns.
    pub fn check(&mut self, humidity_pct: Option<f32>, now: DateTime<Utc>) -> bool {
        let Some(humidity) = humidity_pct else {
            return false;
        };

        if let LockoutPhase::Locked { expires_at } = self.phase {
            if now < expires_at {
                return false;
            }
            info!("HUMIDITY | lockout on relay {} expired", self.rule.relay);
            self.phase = LockoutPhase::Unlocked;
        }

        if humidity >= self.rule.threshold_pct {
            return false;
        }

        let expires_at = self.expiry_after(now);
        self.last_triggered = Some(now);
        self.phase = LockoutPhase::Locked { expires_at };
        info!(
            "HUMIDITY | {:.1}% < {:.1}% on channel {}: pulse relay {}, locked until {}",
            humidity, self.rule.threshold_pct, self.rule.channel, self.rule.relay, expires_at
        );
        true
    }

    /// Apply a new rule. A running lock is re-anchored to the new duration.
    pub fn reconfigure(&mut self, rule: HumidityConfig) {
        self.rule = rule;
        if let (LockoutPhase::Locked { .. }, Some(t)) = (self.phase, self.last_triggered) {
            self.phase = LockoutPhase::Locked {
                expires_at: self.expiry_after(t),
            };
        }
    }

    /// End of a lock that starts at `t`. Saturates instead of overflowing.
    fn expiry_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        t.checked_add_signed(self.lockout()).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
