//! Real-time broadcast router: fans domain events out to live sessions.
//!
//! Topics follow the `vehicle:{id}` / `user:{id}` naming. Delivery is
//! at-most-once and best-effort; a session that joins after an event was
//! published must pull current live state to resynchronize. Messages
//! published for a single vehicle reach any one session in publish order
//! because the pipeline serializes publishes per vehicle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of a live session
pub type SessionId = Uuid;

/// Serialized message payload, shared across subscriber queues
pub type Payload = Arc<str>;

/// A broadcast channel name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Anyone tracking this vehicle
    Vehicle(i64),
    /// Private per-user channel (e.g. a guardian's alerts)
    User(i64),
}

impl Topic {
    /// Parse `vehicle:{id}` or `user:{id}`.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once(':')?;
        let id: i64 = id.parse().ok()?;
        match kind {
            "vehicle" => Some(Topic::Vehicle(id)),
            "user" => Some(Topic::User(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Vehicle(id) => write!(f, "vehicle:{}", id),
            Topic::User(id) => write!(f, "user:{}", id),
        }
    }
}

struct SessionEntry {
    tx: mpsc::Sender<Payload>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<SessionId, SessionEntry>,
    topics: HashMap<Topic, HashSet<SessionId>>,
}

impl HubInner {
    fn remove_session(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.remove(&session) else {
            return;
        };
        for topic in entry.topics {
            if let Some(members) = self.topics.get_mut(&topic) {
                members.remove(&session);
                if members.is_empty() {
                    self.topics.remove(&topic);
                }
            }
        }
        // Dropping the sender closes the session's queue; the socket task
        // observes the close and shuts down.
    }
}

/// Fan-out hub with an explicit session and topic lifecycle.
///
/// Publishers never await a slow consumer: each session has a bounded
/// outbound queue and a session whose queue overflows is disconnected.
pub struct Hub {
    inner: Mutex<HubInner>,
    queue_capacity: usize,
}

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            queue_capacity,
        }
    }

    /// Register a new session and hand back its outbound queue.
    pub async fn connect(&self) -> (SessionId, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            id,
            SessionEntry {
                tx,
                topics: HashSet::new(),
            },
        );
        debug!(session = %id, "session connected");
        (id, rx)
    }

    /// Remove a session and release all of its channel memberships.
    pub async fn disconnect(&self, session: SessionId) {
        let mut inner = self.inner.lock().await;
        inner.remove_session(session);
    }

    /// Join a topic. Idempotent; returns false if the session is unknown.
    pub async fn subscribe(&self, session: SessionId, topic: Topic) -> bool {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(entry) = inner.sessions.get_mut(&session) else {
            return false;
        };
        entry.topics.insert(topic);
        inner.topics.entry(topic).or_default().insert(session);
        true
    }

    /// Leave a topic. Idempotent.
    pub async fn unsubscribe(&self, session: SessionId, topic: Topic) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(entry) = inner.sessions.get_mut(&session) {
            entry.topics.remove(&topic);
        }
        if let Some(members) = inner.topics.get_mut(&topic) {
            members.remove(&session);
            if members.is_empty() {
                inner.topics.remove(&topic);
            }
        }
    }

    /// Publish a message to every session joined to the topic. Returns the
    /// number of sessions the message was queued for.
    pub async fn publish<T: Serialize>(&self, topic: &Topic, message: &T) -> usize {
        let payload: Payload = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("failed to serialize broadcast message: {}", e);
                return 0;
            }
        };

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(members) = inner.topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for &session in members {
            let Some(entry) = inner.sessions.get(&session) else {
                continue;
            };
            match entry.tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session = %session, topic = %topic, "outbound queue overflow, disconnecting session");
                    dead.push(session);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(session),
            }
        }

        for session in dead {
            inner.remove_session(session);
        }

        delivered
    }

    /// Number of connected sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_parses_and_displays() {
        assert_eq!(Topic::parse("vehicle:12"), Some(Topic::Vehicle(12)));
        assert_eq!(Topic::parse("user:7"), Some(Topic::User(7)));
        assert_eq!(Topic::parse("fleet:1"), None);
        assert_eq!(Topic::parse("vehicle:abc"), None);
        assert_eq!(Topic::parse("vehicle"), None);
        assert_eq!(Topic::Vehicle(12).to_string(), "vehicle:12");
        assert_eq!(Topic::User(7).to_string(), "user:7");
    }

    #[tokio::test]
    async fn subscribed_session_receives_published_message() {
        let hub = Hub::new(8);
        let (session, mut rx) = hub.connect().await;
        assert!(hub.subscribe(session, Topic::Vehicle(1)).await);

        let delivered = hub.publish(&Topic::Vehicle(1), &json!({"type": "ping"})).await;
        assert_eq!(delivered, 1);

        let payload = rx.recv().await.expect("payload should arrive");
        assert!(payload.contains("ping"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_delivers_nothing() {
        let hub = Hub::new(8);
        let delivered = hub.publish(&Topic::Vehicle(1), &json!({"type": "ping"})).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let hub = Hub::new(8);
        let (session, mut rx) = hub.connect().await;
        hub.subscribe(session, Topic::Vehicle(1)).await;
        hub.subscribe(session, Topic::Vehicle(1)).await;

        let delivered = hub.publish(&Topic::Vehicle(1), &json!({"n": 1})).await;
        assert_eq!(delivered, 1);
        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err(), "double join must not duplicate delivery");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let hub = Hub::new(8);
        let (session, _rx) = hub.connect().await;
        hub.subscribe(session, Topic::Vehicle(1)).await;
        hub.unsubscribe(session, Topic::Vehicle(1)).await;
        hub.unsubscribe(session, Topic::Vehicle(1)).await;

        let delivered = hub.publish(&Topic::Vehicle(1), &json!({"n": 1})).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn disconnect_releases_all_memberships() {
        let hub = Hub::new(8);
        let (session, mut rx) = hub.connect().await;
        hub.subscribe(session, Topic::Vehicle(1)).await;
        hub.subscribe(session, Topic::User(5)).await;

        hub.disconnect(session).await;
        assert_eq!(hub.session_count().await, 0);
        assert_eq!(hub.publish(&Topic::Vehicle(1), &json!({})).await, 0);
        assert_eq!(hub.publish(&Topic::User(5), &json!({})).await, 0);
        // The queue closes once the hub drops its sender.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn overflowing_session_is_disconnected() {
        let hub = Hub::new(1);
        let (session, mut rx) = hub.connect().await;
        hub.subscribe(session, Topic::Vehicle(1)).await;

        assert_eq!(hub.publish(&Topic::Vehicle(1), &json!({"n": 1})).await, 1);
        // The queue holds one message; this one overflows and cuts the
        // session off.
        assert_eq!(hub.publish(&Topic::Vehicle(1), &json!({"n": 2})).await, 0);
        assert_eq!(hub.session_count().await, 0);

        let first = rx.recv().await.expect("first message was queued");
        assert!(first.contains("1"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn messages_arrive_in_publish_order() {
        let hub = Hub::new(16);
        let (session, mut rx) = hub.connect().await;
        hub.subscribe(session, Topic::Vehicle(3)).await;

        for n in 0..5 {
            hub.publish(&Topic::Vehicle(3), &json!({"seq": n})).await;
        }
        for n in 0..5 {
            let payload = rx.recv().await.unwrap();
            assert!(payload.contains(&format!("{}", n)), "payload {} missing seq {}", payload, n);
        }
    }
}
