//! An in-process pub/sub keyed by `(project, category)` (spec §2): delivers
//! lifecycle records and log lines to long-lived subscribers over websocket
//! or HTTP chunked streams.
//!
//! Each subscriber owns one unbounded channel and is isolated by its own
//! send call, so a single slow or broken subscriber cannot stall others
//! (spec §5 "Scheduling model"): `publish` never awaits a subscriber, it
//! only pushes onto that subscriber's queue.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

/// An event delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Event {
    pub project: Option<String>,
    pub category: String,
    pub payload: Value,
}

struct Subscription {
    id: u64,
    /// `None` means "all projects".
    project: Option<String>,
    category: Option<String>,
    tx: mpsc::UnboundedSender<Event>,
}

/// The process-wide event bus. Cheap to clone: internally reference
/// counted.
#[derive(Clone)]
pub struct EventBus {
    inner: std::sync::Arc<RwLock<Vec<Subscription>>>,
    next_id: std::sync::Arc<AtomicU64>,
}

/// A handle to an active subscription. Dropping it, or calling
/// [`Subscriber::unsubscribe`] explicitly, removes the listener from the bus
/// (spec §5 "Cancellation": "closing the listener context removes the
/// listener from the bus").
pub struct Subscriber {
    id: u64,
    bus: EventBus,
    pub rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscriber {
    pub fn unsubscribe(self) {
        // Drop performs the removal; this method exists so call sites can
        // express the intent explicitly.
        drop(self);
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.bus.inner.write().retain(|s| s.id != self.id);
    }
}

impl Default for EventBus {
    fn default() -> EventBus {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            inner: std::sync::Arc::new(RwLock::new(Vec::new())),
            next_id: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribes to events for `project` (`None` for every project) and,
    /// optionally, a single `category` (`None` for every category).
    pub fn subscribe(&self, project: Option<String>, category: Option<String>) -> Subscriber {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.write().push(Subscription {
            id,
            project,
            category,
            tx,
        });
        Subscriber {
            id,
            bus: self.clone(),
            rx,
        }
    }

    /// Publishes an event. Never blocks: each subscriber's channel is
    /// unbounded, so a slow reader accumulates backlog rather than stalling
    /// the publisher or other subscribers.
    pub fn publish(&self, project: Option<&str>, category: &str, payload: Value) {
        let subs = self.inner.read();
        for sub in subs.iter() {
            let project_matches = match &sub.project {
                None => true,
                Some(p) => project == Some(p.as_str()),
            };
            let category_matches = match &sub.category {
                None => true,
                Some(c) => c == category,
            };
            if project_matches && category_matches {
                // An error here means the subscriber's receiver (and the
                // `Subscriber` guard that would otherwise unsubscribe it)
                // has already been dropped; nothing to do.
                let _ = sub.tx.send(Event {
                    project: project.map(str::to_string),
                    category: category.to_string(),
                    payload: payload.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_only_receives_matching_project_and_category() {
        let bus = EventBus::new();
        let mut sub_a = bus.subscribe(Some("proj-a".into()), Some("operation".into()));
        let mut sub_all = bus.subscribe(None, None);

        bus.publish(Some("proj-a"), "operation", Value::from(1));
        bus.publish(Some("proj-b"), "operation", Value::from(2));
        bus.publish(Some("proj-a"), "log", Value::from(3));

        let got = sub_a.rx.recv().await.unwrap();
        assert_eq!(got.payload, Value::from(1));
        assert!(sub_a.rx.try_recv().is_err());

        let mut seen = vec![];
        for _ in 0..3 {
            seen.push(sub_all.rx.recv().await.unwrap().payload);
        }
        assert_eq!(seen, vec![Value::from(1), Value::from(2), Value::from(3)]);
    }

    #[tokio::test]
    async fn dropping_subscriber_removes_it_from_the_bus() {
        let bus = EventBus::new();
        let sub = bus.subscribe(None, None);
        assert_eq!(bus.inner.read().len(), 1);
        drop(sub);
        assert_eq!(bus.inner.read().len(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publish_to_others() {
        let bus = EventBus::new();
        let slow = bus.subscribe(None, None); // never polled
        let mut fast = bus.subscribe(None, None);
        for i in 0..10_000 {
            bus.publish(None, "log", Value::from(i));
        }
        // The fast subscriber still sees everything promptly even though
        // `slow`'s queue has 10,000 unread messages sitting in it.
        assert_eq!(fast.rx.recv().await.unwrap().payload, Value::from(0));
        drop(slow);
    }
}
