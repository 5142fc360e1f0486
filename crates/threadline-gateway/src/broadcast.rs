//! Per-session SSE fan-out (spec §4.8): one `broadcast::Sender<String>` per
//! session rather than a single process-wide channel — sessions are
//! long-lived and mostly idle, and a shared channel would hand every
//! subscriber every other session's traffic for them to filter back out.

use dashmap::DashMap;
use threadline_core::config::BROADCAST_CAPACITY;
use threadline_protocol::Event;
use threadline_turn::EventSink;
use tokio::sync::broadcast;

/// Holds one broadcast channel per session id, created lazily on first
/// subscribe or emit and left in place for the session's lifetime.
pub struct SessionBroadcaster {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl Default for SessionBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBroadcaster {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    fn sender(&self, session_id: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }

    /// Subscribe a new SSE client to `session_id`'s stream.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<String> {
        self.sender(session_id).subscribe()
    }
}

impl EventSink for SessionBroadcaster {
    fn emit(&self, session_id: &str, event: Event) {
        // No subscribers is the common case between requests; a send error
        // here only ever means that, so it's dropped rather than logged
        // (spec §7 "Broadcaster write error").
        let _ = self.sender(session_id).send(event.to_sse());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_protocol::EventKind;

    #[tokio::test]
    async fn a_subscriber_receives_events_emitted_after_it_subscribes() {
        let broadcaster = SessionBroadcaster::new();
        let mut rx = broadcaster.subscribe("s1");
        broadcaster.emit("s1", Event::new(EventKind::Ping, serde_json::Value::Null));
        let frame = rx.recv().await.unwrap();
        assert!(frame.starts_with("data: Q\n"));
    }

    #[tokio::test]
    async fn sessions_do_not_see_each_other_s_events() {
        let broadcaster = SessionBroadcaster::new();
        let mut rx_a = broadcaster.subscribe("a");
        let mut rx_b = broadcaster.subscribe("b");
        broadcaster.emit("a", Event::new(EventKind::Ping, serde_json::Value::Null));
        rx_a.try_recv().expect("a should see its own event");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn emitting_with_no_subscribers_does_not_panic() {
        let broadcaster = SessionBroadcaster::new();
        broadcaster.emit("nobody-listening", Event::new(EventKind::Ping, serde_json::Value::Null));
    }
}
