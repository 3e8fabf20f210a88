use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Posted by the host when the peripheral lighting changes. Payload is the colour.
pub const LIGHTING_CHANGED: &str = "LOGILED_LIGHTING_CHANGED";

/// Named application event exchanged with the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEvent {
    pub name: String,
    pub payload: Option<String>,
}

impl AppEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: Option<&str>) -> Self {
        Self {
            name: name.into(),
            payload: payload.map(str::to_string),
        }
    }
}

/// Broadcast bus connecting the bot with whatever else runs on the host.
///
/// Posting never blocks and succeeds even when nobody is subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn post(&self, event: AppEvent) {
        debug!(event = %event.name, "posting event");
        // no receivers is not an error for a fire-and-forget bus
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_without_subscribers() {
        let bus = EventBus::default();
        bus.post(AppEvent::new("next"));
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.post(AppEvent::new("play"));
        bus.post(AppEvent::with_payload("LOGILED", Some("red")));

        assert_eq!(rx.recv().await.unwrap(), AppEvent::new("play"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.name, "LOGILED");
        assert_eq!(second.payload.as_deref(), Some("red"));
    }
}
