//! Named-channel pub/sub decoupling the turn worker from live consumers.
//!
//! Delivery is fire-and-forget and at-most-once: subscribers that connect
//! late see nothing (they catch up from the durable row), and slow
//! subscribers lag without blocking publishers. A turn's channel is
//! `chat:message:<assistant_message_id>`; `done`/`error` is always the
//! last frame published on it.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bus channel name for a turn.
    pub fn turn_channel(message_id: i64) -> String {
        format!("chat:message:{message_id}")
    }

    /// Subscribe to a channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut channels = self.channels.write();
        channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a frame. Dropped silently when nobody ever subscribed.
    pub fn publish(&self, channel: &str, frame: serde_json::Value) {
        let channels = self.channels.read();
        if let Some(tx) = channels.get(channel) {
            let _ = tx.send(frame);
        }
    }

    /// Drop a channel once its turn reached a terminal frame. Connected
    /// receivers observe the close after draining buffered frames.
    pub fn close(&self, channel: &str) {
        self.channels.write().remove(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}
