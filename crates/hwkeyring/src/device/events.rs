use super::DeviceErrorCode;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// Raw event emitted by the device SDK, forwarded untouched.
    Device { payload: serde_json::Value },
    /// A device call failed with a condition the user has to fix before retrying.
    Blocked {
        code: DeviceErrorCode,
        message: String,
    },
}

/// Broadcast channel for hardware UI events. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: UiEvent) -> usize {
        // No subscribers is not an error for a UI channel.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_events_reach_every_subscriber_unchanged() -> eyre::Result<()> {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let ev = UiEvent::Device {
            payload: serde_json::json!({"type": "ui-request_pin", "device": {"id": 7}}),
        };
        assert_eq!(bus.publish(ev.clone()), 2);
        assert_eq!(a.recv().await?, ev);
        assert_eq!(b.recv().await?, ev);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        let n = bus.publish(UiEvent::Blocked {
            code: DeviceErrorCode::BridgeNotInstalled,
            message: "bridge".to_owned(),
        });
        assert_eq!(n, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
