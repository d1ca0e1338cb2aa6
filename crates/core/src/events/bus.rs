use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::events::{BusEvent, EventSubscriber, EventType, ThrottlePolicy};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Slot {
    last_emitted: Option<Instant>,
    pending: Option<BusEvent>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<EventType, Slot>,
    subscribers: HashMap<EventType, Vec<Arc<dyn EventSubscriber>>>,
    catch_all: Vec<Arc<dyn EventSubscriber>>,
}

struct FlushLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    policy: ThrottlePolicy,
    flush_interval: Duration,
    registry: Mutex<Registry>,
    flush_loop: Mutex<Option<FlushLoop>>,
}

/// Coalescing publish/subscribe hub.
///
/// `publish` only parks the event in its type's pending slot; a later flush hands the latest
/// parked event to subscribers once the type's throttle interval has elapsed. Flushes run on
/// the loop spawned by [`EventBus::start`] or on demand through [`EventBus::flush_due`].
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(policy: ThrottlePolicy, flush_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                flush_interval,
                registry: Mutex::new(Registry::default()),
                flush_loop: Mutex::new(None),
            }),
        }
    }

    pub fn publish(&self, event_type: EventType, payload: serde_json::Value) {
        let event = BusEvent::new(event_type, payload);
        let mut registry = lock(&self.inner.registry);
        let slot = registry.slots.entry(event.event_type.clone()).or_default();
        if slot.pending.is_some() {
            debug!(
                event_name = "events.coalesced",
                event_type = %event.event_type,
                "replacing pending event within throttle window"
            );
        }
        slot.pending = Some(event);
    }

    /// Returns false when this exact handler is already registered for the type.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventSubscriber>) -> bool {
        let mut registry = lock(&self.inner.registry);
        let handlers = registry.subscribers.entry(event_type).or_default();
        if handlers.iter().any(|existing| same_handler(existing, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    pub fn unsubscribe(&self, event_type: &EventType, handler: &Arc<dyn EventSubscriber>) -> bool {
        let mut registry = lock(&self.inner.registry);
        let Some(handlers) = registry.subscribers.get_mut(event_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|existing| !same_handler(existing, handler));
        handlers.len() != before
    }

    /// Registers a handler for every event type, including custom types first published later.
    /// Catch-all handlers run after the type-specific ones, in registration order.
    pub fn subscribe_all(&self, handler: Arc<dyn EventSubscriber>) -> bool {
        let mut registry = lock(&self.inner.registry);
        if registry.catch_all.iter().any(|existing| same_handler(existing, &handler)) {
            return false;
        }
        registry.catch_all.push(handler);
        true
    }

    pub fn unsubscribe_all(&self, handler: &Arc<dyn EventSubscriber>) -> bool {
        let mut registry = lock(&self.inner.registry);
        let before = registry.catch_all.len();
        registry.catch_all.retain(|existing| !same_handler(existing, handler));
        registry.catch_all.len() != before
    }

    pub fn subscriber_count(&self, event_type: &EventType) -> usize {
        lock(&self.inner.registry).subscribers.get(event_type).map_or(0, Vec::len)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.registry).slots.values().filter(|slot| slot.pending.is_some()).count()
    }

    /// Emits every pending event whose type is outside its throttle window and returns how
    /// many were emitted.
    pub fn flush_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(BusEvent, Vec<Arc<dyn EventSubscriber>>)> = {
            let mut registry = lock(&self.inner.registry);
            let Registry { slots, subscribers, catch_all } = &mut *registry;
            slots
                .iter_mut()
                .filter_map(|(event_type, slot)| {
                    let interval = self.inner.policy.interval_for(event_type);
                    let open = slot
                        .last_emitted
                        .map_or(true, |last| now.saturating_duration_since(last) >= interval);
                    if !open {
                        return None;
                    }
                    let event = slot.pending.take()?;
                    slot.last_emitted = Some(now);
                    let mut handlers = subscribers.get(event_type).cloned().unwrap_or_default();
                    for handler in catch_all.iter() {
                        if !handlers.iter().any(|existing| same_handler(existing, handler)) {
                            handlers.push(handler.clone());
                        }
                    }
                    Some((event, handlers))
                })
                .collect()
        };

        for (event, handlers) in &due {
            dispatch(event, handlers);
        }
        due.len()
    }

    /// Spawns the flush loop. Returns false if it is already running.
    pub fn start(&self) -> bool {
        let mut flush_loop = lock(&self.inner.flush_loop);
        if flush_loop.is_some() {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let bus = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bus.inner.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        bus.flush_due();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *flush_loop = Some(FlushLoop { shutdown_tx, handle });
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.flush_loop).is_some()
    }

    /// Stops the flush loop and discards anything still pending.
    pub async fn shutdown(&self) {
        let running = lock(&self.inner.flush_loop).take();
        if let Some(FlushLoop { shutdown_tx, handle }) = running {
            let _ = shutdown_tx.send(true);
            if let Err(error) = handle.await {
                warn!(event_name = "events.flush_loop_join_failed", error = %error, "flush loop ended abnormally");
            }
        }

        let dropped = {
            let mut registry = lock(&self.inner.registry);
            registry.slots.values_mut().filter_map(|slot| slot.pending.take()).count()
        };
        debug!(event_name = "events.shutdown", dropped, "event bus stopped");
    }
}

fn dispatch(event: &BusEvent, handlers: &[Arc<dyn EventSubscriber>]) {
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                event_name = "events.subscriber_failed",
                event_type = %event.event_type,
                event_id = %event.id,
                error = %error,
                "subscriber returned an error"
            ),
            Err(_) => warn!(
                event_name = "events.subscriber_panicked",
                event_type = %event.event_type,
                event_id = %event.id,
                "subscriber panicked"
            ),
        }
    }
}

fn same_handler(left: &Arc<dyn EventSubscriber>, right: &Arc<dyn EventSubscriber>) -> bool {
    std::ptr::eq(Arc::as_ptr(left) as *const (), Arc::as_ptr(right) as *const ())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use super::{EventBus, DEFAULT_FLUSH_INTERVAL};
    use crate::events::{BusEvent, EventSubscriber, EventType, SubscriberError, ThrottlePolicy};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<BusEvent>>,
    }

    impl Recorder {
        fn payloads(&self) -> Vec<serde_json::Value> {
            self.seen.lock().expect("recorder lock").iter().map(|e| e.payload.clone()).collect()
        }
    }

    impl EventSubscriber for Recorder {
        fn handle(&self, event: &BusEvent) -> Result<(), SubscriberError> {
            self.seen.lock().expect("recorder lock").push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    impl EventSubscriber for Failing {
        fn handle(&self, _event: &BusEvent) -> Result<(), SubscriberError> {
            Err(SubscriberError::Failed("toast surface gone".to_string()))
        }
    }

    struct Panicking;

    impl EventSubscriber for Panicking {
        fn handle(&self, _event: &BusEvent) -> Result<(), SubscriberError> {
            panic!("subscriber bug")
        }
    }

    fn bus() -> EventBus {
        EventBus::new(ThrottlePolicy::default(), DEFAULT_FLUSH_INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_is_coalesced_to_last_payload() {
        let bus = bus();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(EventType::OrderApproved, recorder.clone());

        for n in 0..10 {
            bus.publish(EventType::OrderApproved, json!({ "n": n }));
        }
        assert_eq!(bus.flush_due(), 1);
        assert_eq!(recorder.payloads(), vec![json!({ "n": 9 })]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_window_defers_the_next_emission() {
        let bus = bus();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(EventType::OrderSubmitted, recorder.clone());

        bus.publish(EventType::OrderSubmitted, json!({ "n": 1 }));
        assert_eq!(bus.flush_due(), 1);

        bus.publish(EventType::OrderSubmitted, json!({ "n": 2 }));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(bus.flush_due(), 0);
        assert_eq!(bus.pending_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(bus.flush_due(), 1);
        assert_eq!(recorder.payloads(), vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    }

    #[tokio::test(start_paused = true)]
    async fn types_are_throttled_independently() {
        let bus = bus();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(EventType::OrderApproved, recorder.clone());
        bus.subscribe(EventType::OrderRejected, recorder.clone());

        bus.publish(EventType::OrderApproved, json!("a"));
        bus.publish(EventType::OrderRejected, json!("r"));

        assert_eq!(bus.flush_due(), 2);
        assert_eq!(recorder.payloads().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_subscription_is_a_no_op() {
        let bus = bus();
        let recorder: Arc<dyn EventSubscriber> = Arc::new(Recorder::default());

        assert!(bus.subscribe(EventType::OrderApproved, recorder.clone()));
        assert!(!bus.subscribe(EventType::OrderApproved, recorder.clone()));
        assert!(bus.subscribe(EventType::OrderRejected, recorder.clone()));
        assert_eq!(bus.subscriber_count(&EventType::OrderApproved), 1);

        assert!(bus.unsubscribe(&EventType::OrderApproved, &recorder));
        assert!(!bus.unsubscribe(&EventType::OrderApproved, &recorder));
        assert_eq!(bus.subscriber_count(&EventType::OrderApproved), 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_subscribers_do_not_block_others() {
        let bus = bus();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(EventType::DeliveryFailed, Arc::new(Failing));
        bus.subscribe(EventType::DeliveryFailed, Arc::new(Panicking));
        bus.subscribe(EventType::DeliveryFailed, recorder.clone());

        bus.publish(EventType::DeliveryFailed, json!({ "po_id": "po-1" }));

        assert_eq!(bus.flush_due(), 1);
        assert_eq!(recorder.payloads().len(), 1);
    }

    struct Journal {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl EventSubscriber for Journal {
        fn handle(&self, _event: &BusEvent) -> Result<(), SubscriberError> {
            self.log.lock().expect("journal lock").push(self.label);
            Ok(())
        }
    }

    #[tokio::test]
    async fn subscribers_run_in_registration_order() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            bus.subscribe(EventType::OrderApproved, Arc::new(Journal { label, log: log.clone() }));
        }
        bus.subscribe_all(Arc::new(Journal { label: "catch_all", log: log.clone() }));

        bus.publish(EventType::OrderApproved, json!({ "po_id": "po-1" }));
        assert_eq!(bus.flush_due(), 1);

        assert_eq!(*log.lock().expect("journal lock"), vec!["first", "second", "third", "catch_all"]);
    }

    #[tokio::test]
    async fn catch_all_handlers_receive_custom_types_once() {
        let bus = bus();
        let recorder: Arc<dyn EventSubscriber> = Arc::new(Recorder::default());
        let seen = Arc::new(Recorder::default());

        assert!(bus.subscribe_all(seen.clone()));
        assert!(!bus.subscribe_all(seen.clone()));
        bus.subscribe(EventType::Custom("low_stock_alert".to_string()), seen.clone());
        assert!(bus.subscribe_all(recorder.clone()));
        assert!(bus.unsubscribe_all(&recorder));

        bus.publish(EventType::Custom("low_stock_alert".to_string()), json!({ "sku": "W-1" }));
        bus.publish(EventType::OrderRejected, json!({ "po_id": "po-2" }));
        assert_eq!(bus.flush_due(), 2);

        let mut payloads = seen.payloads();
        payloads.sort_by_key(|payload| payload.to_string());
        assert_eq!(payloads, vec![json!({ "po_id": "po-2" }), json!({ "sku": "W-1" })]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_loop_delivers_and_shutdown_drops_pending() {
        let bus = EventBus::new(
            ThrottlePolicy::default().with_override(EventType::OrderApproved, Duration::from_secs(60)),
            DEFAULT_FLUSH_INTERVAL,
        );
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(EventType::OrderApproved, recorder.clone());

        assert!(bus.start());
        assert!(!bus.start());

        bus.publish(EventType::OrderApproved, json!(1));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(recorder.payloads(), vec![json!(1)]);

        bus.publish(EventType::OrderApproved, json!(2));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(bus.pending_count(), 1);

        bus.shutdown().await;
        assert!(!bus.is_running());
        assert_eq!(bus.pending_count(), 0);
        assert_eq!(recorder.payloads(), vec![json!(1)]);
    }
}
