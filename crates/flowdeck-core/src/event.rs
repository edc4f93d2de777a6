use crate::types::SyncEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
#[derive(Clone)]
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(SyncEvent::ConnectionRestored);
    }

    #[test]
    fn test_clones_share_channel() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.clone().publish(SyncEvent::ConnectionRestored);
        assert!(matches!(rx.try_recv(), Ok(SyncEvent::ConnectionRestored)));
    }
}
