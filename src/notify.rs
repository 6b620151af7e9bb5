use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-coach broadcast of committed events, for calendar sync and
/// notification consumers. Slow receivers lag; senders never block.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    /// Subscribe to a coach's events. Creates the channel if needed.
    pub fn subscribe(&self, coach_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(coach_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a committed event. No-op if nobody is listening.
    pub fn send(&self, coach_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&coach_id)
            && sender.send(event.clone()).is_err()
        {
            // Every receiver is gone.
            drop(sender);
            self.channels
                .remove_if(&coach_id, |_, s| s.receiver_count() == 0);
        }
    }
}
