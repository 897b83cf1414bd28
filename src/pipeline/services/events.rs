use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use tracing::{error, trace};

use crate::common::SharedFrame;
use crate::pipeline::types::{EventKind, GrabberEvent, ResultEnvelope, SubscriptionId};

type Handler<R> = Arc<dyn Fn(&GrabberEvent<R>) + Send + Sync>;

struct Subscriber<R> {
    filter: Option<EventKind>,
    handler: Handler<R>,
}

/// Registry of event subscribers owned by one grabber.
///
/// Handlers run synchronously on the task that raised the event: frame events on the
/// producer loop, results on the consumer loop, lifecycle events on the caller of start/stop.
/// A panicking handler is logged and does not take the pipeline down.
pub struct EventHub<R> {
    subscribers: RwLock<IndexMap<SubscriptionId, Subscriber<R>>>,
}

impl<R> Default for EventHub<R> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(IndexMap::new()),
        }
    }
}

impl<R> EventHub<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&GrabberEvent<R>) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(handler))
    }

    pub fn subscribe_kind<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&GrabberEvent<R>) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(handler))
    }

    pub fn on_frame_captured<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SharedFrame) + Send + Sync + 'static,
    {
        self.subscribe_kind(EventKind::FrameCaptured, move |event| {
            if let GrabberEvent::FrameCaptured(frame) = event {
                handler(frame);
            }
        })
    }

    pub fn on_result_available<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ResultEnvelope<R>) + Send + Sync + 'static,
    {
        self.subscribe_kind(EventKind::ResultAvailable, move |event| {
            if let GrabberEvent::ResultAvailable(envelope) = event {
                handler(envelope);
            }
        })
    }

    /// For the four lifecycle kinds, which carry no payload.
    pub fn on_lifecycle<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_kind(kind, move |_| handler())
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn publish(&self, event: &GrabberEvent<R>) {
        let kind = event.kind();
        // Snapshot first so handlers may subscribe or unsubscribe while being called.
        let handlers: Vec<Handler<R>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.filter.map_or(true, |k| k == kind))
            .map(|s| s.handler.clone())
            .collect();
        trace!("Publishing {:?} to {} handler(s)", event, handlers.len());

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!("Event handler panicked while handling {:?}", kind);
            }
        }
    }

    fn insert(&self, filter: Option<EventKind>, handler: Handler<R>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscriber { filter, handler });
        id
    }
}
