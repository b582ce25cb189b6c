//! Bounded notification queue.
//!
//! A push front end (websocket, MQTT bridge) drains this on its own
//! schedule. Sends never block the control loop: when the queue is full
//! the notification is dropped and counted.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::trace;

use crate::app::events::Notification;
use crate::app::ports::NotificationSink;

/// Queue depth. A 30 s tick over 3 channels and 6 relays stays well below this.
pub const QUEUE_DEPTH: usize = 32;

pub struct BroadcastQueue {
    queue: Channel<CriticalSectionRawMutex, Notification, QUEUE_DEPTH>,
    dropped: AtomicU32,
}

impl Default for BroadcastQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastQueue {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Take everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Ok(n) = self.queue.try_receive() {
            out.push(n);
        }
        out
    }

    /// Notifications lost to a full queue since start.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl NotificationSink for BroadcastQueue {
    fn notify(&self, notification: &Notification) {
        if self.queue.try_send(notification.clone()).is_err() {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("broadcast queue full, dropped {} so far", n);
        }
    }
}
