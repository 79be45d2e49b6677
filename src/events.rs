//! Event dispatch hub.
//!
//! Fans decoded events out to subscribers. A subscriber either names an
//! [`EventKind`] and receives every event of that kind, or names a concrete
//! [`TypedEvent`] type and receives only events that re-interpret as it
//! (events of the same kind but another shape are skipped silently).
//!
//! Delivery follows registration order across both flavours. Handlers run
//! outside the registry lock, so a handler may subscribe or cancel; a
//! cancelled subscription is not called again, even for the frame being
//! dispatched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::DecodeError;
use crate::logging::Logger;
use crate::protocol::{self, Event, EventKind, TypedEvent};

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

enum Filter {
    Kind(EventKind),
    Any,
}

struct Subscriber {
    id: u64,
    filter: Filter,
    active: Arc<AtomicBool>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl Registry {
    fn remove(&mut self, id: u64) {
        self.subscribers.retain(|s| s.id != id);
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Handle to a registered handler.
///
/// Dropping the handle keeps the subscription alive; call
/// [`cancel`](Self::cancel) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Stop delivering events to this handler.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.id);
        }
    }

    /// Whether the handler still receives events.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Multiplexes decoded events to subscribers.
#[derive(Clone)]
pub struct EventHub {
    registry: Arc<Mutex<Registry>>,
    logger: Logger,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl EventHub {
    /// An empty hub.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            logger,
        }
    }

    fn register(&self, filter: Filter, handler: Handler) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.push(Subscriber {
            id,
            filter,
            active: Arc::clone(&active),
            handler,
        });
        Subscription {
            id,
            active,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Receive every event of `kind`.
    pub fn subscribe_kind<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.logger
            .debug(format_args!("[Events] Subscribing to kind {kind}"));
        self.register(Filter::Kind(kind), Arc::new(handler))
    }

    /// Receive every event that re-interprets as `T`.
    pub fn subscribe<T, F>(&self, handler: F) -> Subscription
    where
        T: TypedEvent,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(
            Filter::Any,
            Arc::new(move |event: &Event| {
                if let Some(typed) = T::from_event(event) {
                    handler(typed);
                }
            }),
        )
    }

    /// Receive every event.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Filter::Any, Arc::new(handler))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    /// Deliver `event` to every matching subscriber.
    pub fn dispatch(&self, event: &Event) {
        let matching: Vec<(Arc<AtomicBool>, Handler)> = lock(&self.registry)
            .subscribers
            .iter()
            .filter(|s| match &s.filter {
                Filter::Kind(kind) => *kind == event.kind,
                Filter::Any => true,
            })
            .map(|s| (Arc::clone(&s.active), Arc::clone(&s.handler)))
            .collect();

        for (active, handler) in matching {
            if active.load(Ordering::Acquire) {
                handler(event);
            }
        }
    }

    /// Deliver a locally synthesized event.
    pub fn publish(&self, event: Event) {
        self.dispatch(&event);
    }

    /// Decode a raw frame and dispatch it. Decode errors are logged and the
    /// frame is dropped.
    pub fn dispatch_frame(&self, bytes: &[u8]) -> Result<Event, DecodeError> {
        match protocol::decode(bytes) {
            Ok(event) => {
                self.dispatch(&event);
                Ok(event)
            }
            Err(e) => {
                self.logger
                    .warn(format_args!("[Events] Dropping undecodable frame: {e}"));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::event::{
        ConnectionStateChangedEvent, EventPayload, InactivityPopupEvent, MessageCreatedEvent,
        UnexpectedDisconnectEvent,
    };
    use crate::transport::SessionState;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn hub() -> EventHub {
        EventHub::new(Logger::default())
    }

    fn message_created_frame() -> Vec<u8> {
        json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "eventType": "MessageCreated",
            "data": {
                "thread": {"idOnExternalPlatform": "8a3c1d2e-0000-4000-8000-000000000001"},
                "message": {
                    "idOnExternalPlatform": "0d4f0e6c-7c1b-4c8c-9a59-0f0b3c7e8f01",
                    "threadIdOnExternalPlatform": "8a3c1d2e-0000-4000-8000-000000000001",
                    "messageContent": {"type": "TEXT", "payload": {"text": "Hello"}},
                    "createdAt": "2024-05-01T10:00:00Z",
                    "direction": "outbound"
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    fn disconnect_event() -> Event {
        Event::local(
            EventKind::UnexpectedDisconnect,
            EventPayload::UnexpectedDisconnect(UnexpectedDisconnectEvent {
                reason: "gone".to_string(),
            }),
        )
    }

    #[test]
    fn test_kind_and_typed_subscribers_in_registration_order() {
        let hub = hub();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let _a = hub.subscribe::<MessageCreatedEvent, _>(move |_| o.lock().unwrap().push("typed"));
        let o = Arc::clone(&order);
        let _b = hub.subscribe_kind(EventKind::MessageCreated, move |_| {
            o.lock().unwrap().push("kind");
        });
        let o = Arc::clone(&order);
        let _c = hub.subscribe_kind(EventKind::ThreadUpdated, move |_| {
            o.lock().unwrap().push("other");
        });

        hub.dispatch_frame(&message_created_frame()).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["typed", "kind"]);
    }

    #[test]
    fn test_typed_subscriber_skips_same_kind_other_shape() {
        let hub = hub();
        let popups = Arc::new(StdMutex::new(0));
        let p = Arc::clone(&popups);
        let _sub = hub.subscribe::<InactivityPopupEvent, _>(move |_| *p.lock().unwrap() += 1);

        let event = hub.dispatch_frame(&message_created_frame()).unwrap();
        assert_eq!(event.kind, EventKind::MessageCreated);
        assert_eq!(*popups.lock().unwrap(), 0);
    }

    #[test]
    fn test_cancelled_subscription_receives_nothing() {
        let hub = hub();
        let count = Arc::new(StdMutex::new(0));
        let c = Arc::clone(&count);
        let sub = hub.subscribe::<UnexpectedDisconnectEvent, _>(move |_| *c.lock().unwrap() += 1);

        hub.publish(disconnect_event());
        sub.cancel();
        hub.publish(disconnect_event());

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(!sub.is_active());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_may_cancel_another_during_dispatch() {
        let hub = hub();
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let victim_slot: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));

        let slot = Arc::clone(&victim_slot);
        let c = Arc::clone(&calls);
        let _first = hub.subscribe_all(move |_| {
            c.lock().unwrap().push("first");
            if let Some(victim) = slot.lock().unwrap().take() {
                victim.cancel();
            }
        });
        let c = Arc::clone(&calls);
        let victim = hub.subscribe_all(move |_| c.lock().unwrap().push("victim"));
        *victim_slot.lock().unwrap() = Some(victim);

        hub.publish(disconnect_event());
        assert_eq!(*calls.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_undecodable_frame_dispatches_nothing() {
        let hub = hub();
        let count = Arc::new(StdMutex::new(0));
        let c = Arc::clone(&count);
        let _sub = hub.subscribe_all(move |_| *c.lock().unwrap() += 1);

        assert!(hub.dispatch_frame(b"{\"eventType\": \"MessageCreated\"}").is_err());
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn test_local_state_events_are_typed() {
        let hub = hub();
        let seen = Arc::new(StdMutex::new(None));
        let s = Arc::clone(&seen);
        let _sub = hub.subscribe::<ConnectionStateChangedEvent, _>(move |e| {
            *s.lock().unwrap() = Some(e.to);
        });

        hub.publish(Event::local(
            EventKind::ConnectionStateChanged,
            EventPayload::ConnectionStateChanged(ConnectionStateChangedEvent {
                from: SessionState::Connecting,
                to: SessionState::Open,
            }),
        ));
        assert_eq!(*seen.lock().unwrap(), Some(SessionState::Open));
    }
}
