//! Outbound notifications.
//!
//! The [`ControlService`](super::service::ControlService) and the relay
//! actuator broadcast these through the
//! [`NotificationSink`](super::ports::NotificationSink) port. Adapters on
//! the other side decide what to do with them: log them, queue them for a
//! push channel, drop them.

use chrono::{DateTime, Utc};

use crate::model::{ChannelId, Reading, RelayId, Trigger};

/// Structured notifications emitted by the controller core.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A channel emitted a reading this tick (fresh or fallback).
    ReadingUpdated(Reading),

    /// A relay changed state.
    RelayChanged {
        relay: RelayId,
        state: bool,
        trigger: Trigger,
        at: DateTime<Utc>,
    },

    /// Something went wrong that observers should see.
    ErrorOccurred {
        channel: Option<ChannelId>,
        message: String,
    },
}
