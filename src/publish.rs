//! Publisher port and the in-process broadcast hub behind it.
//!
//! The engines and schedulers publish (topic, payload) pairs and never see
//! subscriber lists; WebSocket sessions subscribe to the hub and filter
//! frames by their own topic set.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

/// Abstract sink for outbound frames. Best-effort and non-blocking from
/// the caller's perspective; ordering holds per topic for a single
/// producer.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// Topic name builders for the realtime surface.
pub mod topics {
    /// Aggregate counts and the final reveal frame.
    pub fn votes(session_id: &str) -> String {
        format!("votes/{session_id}")
    }

    /// One frame per accepted vote.
    pub fn vote_events(session_id: &str) -> String {
        format!("vote-events/{session_id}")
    }

    /// Per-caller vote acknowledgments.
    pub fn vote_response(session_id: &str) -> String {
        format!("vote-response/{session_id}")
    }

    /// One frame per accepted chat message.
    pub fn chat(session_id: &str) -> String {
        format!("chat/{session_id}")
    }
}

/// Capacity of the broadcast channel. Receivers that fall behind skip
/// frames (RecvError::Lagged); the reconnect snapshot covers them.
const HUB_CAPACITY: usize = 4096;

/// A frame fanned out to every connected subscriber.
#[derive(Debug, Clone)]
pub struct Frame {
    pub topic: String,
    pub payload: Value,
}

/// The process-wide fan-out channel. Cheap to clone; stored in AppState.
#[derive(Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<Arc<Frame>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Each WebSocket session calls this once for its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for BroadcastHub {
    fn publish(&self, topic: &str, payload: Value) {
        // send() returns Err if there are no receivers; that's fine.
        let _ = self.sender.send(Arc::new(Frame {
            topic: topic.to_string(),
            payload,
        }));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn topic_builders() {
        assert_eq!(topics::votes("abc"), "votes/abc");
        assert_eq!(topics::vote_events("abc"), "vote-events/abc");
        assert_eq!(topics::vote_response("abc"), "vote-response/abc");
        assert_eq!(topics::chat("abc"), "chat/abc");
    }

    #[tokio::test]
    async fn subscribers_receive_published_frames() {
        let hub = BroadcastHub::new();
        let mut rx = hub.subscribe();

        hub.publish("votes/s1", json!({"boy": 1, "girl": 0}));

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.topic, "votes/s1");
        assert_eq!(frame.payload["boy"], 1);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let hub = BroadcastHub::new();
        hub.publish("votes/s1", json!({}));
    }
}
