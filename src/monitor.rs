use tokio::sync::broadcast;
use tracing::trace;

use crate::frame::{Message, Response};

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observer of completed bus traffic.
pub trait EbusMonitor: Send + Sync {
    fn notify_broadcast(&self, msg: &Message);
    fn notify(&self, msg: &Message, response: &Response);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Broadcast(Message),
    Exchange(Message, Response),
}

/// Fans bus events out to any number of async subscribers.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<BusEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: BusEvent) {
        // no subscribers is fine
        if self.tx.send(event).is_err() {
            trace!("bus event without subscribers");
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EbusMonitor for EventHub {
    fn notify_broadcast(&self, msg: &Message) {
        self.publish(BusEvent::Broadcast(msg.clone()));
    }

    fn notify(&self, msg: &Message, response: &Response) {
        self.publish(BusEvent::Exchange(msg.clone(), response.clone()));
    }
}
