use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Appointment, TransitionKind};

const CHANNEL_CAPACITY: usize = 256;

/// What the external notification dispatcher receives. Delivery failure
/// never affects the persisted appointment.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: TransitionKind,
    pub appointment: Appointment,
}

/// Broadcast hub the notification dispatcher subscribes to, one channel
/// per appointment.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notices for an appointment. Creates the channel if needed.
    pub fn subscribe(&self, appointment_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(appointment_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, appointment_id: Ulid, notice: Notice) {
        if let Some(sender) = self.channels.get(&appointment_id) {
            let _ = sender.send(notice);
        }
    }

    /// Remove a channel (e.g. when an appointment is deleted).
    pub fn remove(&self, appointment_id: &Ulid) {
        self.channels.remove(appointment_id);
    }
}
