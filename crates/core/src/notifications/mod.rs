//! Bounded, self-expiring list of user-facing notifications fed from the event bus.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::NotificationSettings;
use crate::events::{BusEvent, EventSubscriber, EventType, Severity, SubscriberError};

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub po_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

struct Entry {
    notification: Notification,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    unread_count: usize,
}

struct Inner {
    capacity: usize,
    ttl: Duration,
    state: Mutex<QueueState>,
}

/// Newest-first notification list.
///
/// `unread_count` is a bell counter: it tracks notifications received and not yet
/// acknowledged, so entries that expire or fall off the end still count until read.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<Inner>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl NotificationQueue {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                ttl,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn from_settings(settings: &NotificationSettings) -> Self {
        Self::new(settings.capacity, Duration::from_secs(settings.ttl_secs))
    }

    pub fn enqueue(&self, event: &BusEvent) -> String {
        let (title, message) = describe(event);
        let notification = Notification {
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            severity: event.severity,
            title,
            message,
            po_id: text(&event.payload, "po_id"),
            created_at: event.published_at,
            read: false,
        };
        let id = notification.id.clone();

        {
            let mut state = lock(&self.inner.state);
            state.entries.push_front(Entry { notification, expires_at: Instant::now() + self.inner.ttl });
            state.entries.truncate(self.inner.capacity);
            state.unread_count += 1;
        }

        self.schedule_expiry(id.clone());
        id
    }

    pub fn entries(&self) -> Vec<Notification> {
        let mut state = lock(&self.inner.state);
        purge_expired(&mut state, Instant::now());
        state.entries.iter().map(|entry| entry.notification.clone()).collect()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.inner.state).unread_count
    }

    /// Returns true only when an unread entry became read.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut state = lock(&self.inner.state);
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| entry.notification.id == id && !entry.notification.read)
        else {
            return false;
        };
        entry.notification.read = true;
        state.unread_count = state.unread_count.saturating_sub(1);
        true
    }

    pub fn mark_all_read(&self) {
        let mut state = lock(&self.inner.state);
        for entry in &mut state.entries {
            entry.notification.read = true;
        }
        state.unread_count = 0;
    }

    pub fn clear(&self, id: &str) -> bool {
        let mut state = lock(&self.inner.state);
        let before = state.entries.len();
        state.entries.retain(|entry| entry.notification.id != id);
        state.entries.len() != before
    }

    fn schedule_expiry(&self, id: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let ttl = self.inner.ttl;
        runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = inner.upgrade() {
                let mut state = lock(&inner.state);
                state.entries.retain(|entry| entry.notification.id != id || entry.notification.read);
            }
        });
    }
}

impl EventSubscriber for NotificationQueue {
    fn handle(&self, event: &BusEvent) -> Result<(), SubscriberError> {
        self.enqueue(event);
        Ok(())
    }
}

fn purge_expired(state: &mut QueueState, now: Instant) {
    state.entries.retain(|entry| entry.notification.read || entry.expires_at > now);
}

fn describe(event: &BusEvent) -> (String, String) {
    let payload = &event.payload;
    let order = text(payload, "order_number").unwrap_or_else(|| "unknown".to_string());
    match &event.event_type {
        EventType::OrderSubmitted => {
            (format!("Order #{order} submitted"), "Waiting for approval.".to_string())
        }
        EventType::OrderApproved => (
            format!("Order #{order} approved"),
            "The vendor will be notified with the purchase order document.".to_string(),
        ),
        EventType::OrderRejected => (
            format!("Order #{order} rejected"),
            text(payload, "reason").unwrap_or_else(|| "No reason recorded.".to_string()),
        ),
        EventType::OrderCompleted => {
            (format!("Order #{order} completed"), "Goods received.".to_string())
        }
        EventType::DeliverySucceeded => (
            "Vendor notified".to_string(),
            format!(
                "Order #{order} sent via {}.",
                text(payload, "channel").unwrap_or_else(|| "email".to_string())
            ),
        ),
        EventType::DeliveryFailed => (
            "Vendor notification failed".to_string(),
            format!(
                "Order #{order}: {}",
                text(payload, "error").unwrap_or_else(|| "delivery failed".to_string())
            ),
        ),
        EventType::ArtifactCacheWarning => (
            "Document cache degraded".to_string(),
            text(payload, "message").unwrap_or_else(|| "A cache tier could not be written.".to_string()),
        ),
        EventType::Custom(name) => (
            text(payload, "title").unwrap_or_else(|| name.clone()),
            text(payload, "message").unwrap_or_default(),
        ),
    }
}

fn text(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::NotificationQueue;
    use crate::events::{BusEvent, EventSubscriber, EventType, Severity};

    fn approved(order_number: &str) -> BusEvent {
        BusEvent::new(
            EventType::OrderApproved,
            json!({ "po_id": "po-1", "order_number": order_number }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn entries_are_newest_first_and_titled_per_type() {
        let queue = NotificationQueue::default();
        queue.enqueue(&approved("PO-1"));
        queue.enqueue(&BusEvent::new(
            EventType::OrderRejected,
            json!({ "order_number": "PO-2", "reason": "over budget" }),
        ));

        let entries = queue.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Order #PO-2 rejected");
        assert_eq!(entries[0].message, "over budget");
        assert_eq!(entries[1].title, "Order #PO-1 approved");
        assert_eq!(entries[1].po_id.as_deref(), Some("po-1"));
        assert_eq!(queue.unread_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drops_oldest_but_keeps_counting() {
        let queue = NotificationQueue::new(3, Duration::from_secs(5));
        for n in 0..5 {
            queue.enqueue(&approved(&format!("PO-{n}")));
        }

        let entries = queue.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].title, "Order #PO-4 approved");
        assert_eq!(entries[2].title, "Order #PO-2 approved");
        assert_eq!(queue.unread_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unread_entries_expire_but_read_entries_stay() {
        let queue = NotificationQueue::default();
        let kept = queue.enqueue(&approved("PO-1"));
        queue.enqueue(&approved("PO-2"));
        assert!(queue.mark_read(&kept));

        tokio::time::sleep(Duration::from_secs(6)).await;

        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, kept);
        assert_eq!(queue.unread_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_read_only_counts_once() {
        let queue = NotificationQueue::default();
        let id = queue.enqueue(&approved("PO-1"));

        assert!(queue.mark_read(&id));
        assert!(!queue.mark_read(&id));
        assert!(!queue.mark_read("missing"));
        assert_eq!(queue.unread_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_all_read_and_clear() {
        let queue = NotificationQueue::default();
        let first = queue.enqueue(&approved("PO-1"));
        queue.enqueue(&BusEvent::new(EventType::DeliveryFailed, json!({ "order_number": "PO-1", "error": "smtp down" })));

        queue.mark_all_read();
        assert_eq!(queue.unread_count(), 0);
        assert!(queue.entries().iter().all(|entry| entry.read));

        assert!(queue.clear(&first));
        assert!(!queue.clear(&first));
        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert_eq!(entries[0].message, "Order #PO-1: smtp down");
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_to_bus_events() {
        let queue = NotificationQueue::default();
        queue
            .handle(&BusEvent::new(
                EventType::Custom("inventory_low".to_string()),
                json!({ "title": "Stock low", "message": "Bolts below reorder point" }),
            ))
            .expect("queue accepts events");

        let entries = queue.entries();
        assert_eq!(entries[0].title, "Stock low");
        assert_eq!(entries[0].message, "Bolts below reorder point");
    }
}
