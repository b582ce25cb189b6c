//! Log-based notification adapter.
//!
//! Implements [`NotificationSink`] by writing each notification to the
//! `log` facade, which the host binary routes to its tracing subscriber.

use log::{info, warn};

use crate::app::events::Notification;
use crate::app::ports::NotificationSink;

/// Adapter that logs every [`Notification`].
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::ReadingUpdated(r) => {
                info!(
                    "READING | ch={} | T={} | RH={} | {}",
                    r.channel,
                    r.temperature_c.map_or("-".into(), |t| format!("{t:.1}\u{00b0}C")),
                    r.humidity_pct.map_or("-".into(), |h| format!("{h:.1}%")),
                    if r.valid { "live" } else { "cached" },
                );
            }
            Notification::RelayChanged {
                relay,
                state,
                trigger,
                at,
            } => {
                info!(
                    "RELAY | {} -> {} | {} | {}",
                    relay,
                    if *state { "ON" } else { "OFF" },
                    trigger,
                    at.to_rfc3339()
                );
            }
            Notification::ErrorOccurred { channel, message } => match channel {
                Some(ch) => warn!("ERROR | ch={} | {}", ch, message),
                None => warn!("ERROR | {}", message),
            },
        }
    }
}
