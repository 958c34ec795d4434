use tokio::sync::broadcast;

use crate::event::CoreEvent;

/// Broadcast bus carrying registry and orchestrator lifecycle events.
///
/// Publishing never blocks; events are dropped for subscribers that lag
/// behind the channel capacity.
#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<CoreEvent>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. A send error only means
    /// nobody is listening, which is fine for lifecycle notifications.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ToolEventPayload;
    use tokio::time::{timeout, Duration};

    fn test_event() -> CoreEvent {
        CoreEvent::ToolRegistered(ToolEventPayload {
            tool_id: "s1:echo".to_string(),
            category: crate::types::ToolCategory::General,
        })
    }

    #[tokio::test]
    async fn publish_and_receive_event() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(test_event());

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert!(matches!(received, CoreEvent::ToolRegistered(ref e) if e.tool_id == "s1:echo"));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_event() {
        let bus = Bus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(test_event());

        let event1 = rx1.recv().await.expect("recv1");
        let event2 = rx2.recv().await.expect("recv2");

        assert!(matches!(event1, CoreEvent::ToolRegistered(ref e) if e.tool_id == "s1:echo"));
        assert!(matches!(event2, CoreEvent::ToolRegistered(ref e) if e.tool_id == "s1:echo"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = Bus::new(8);
        bus.publish(test_event());
    }
}
