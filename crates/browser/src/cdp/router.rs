//! Event Router - fan-out of CDP events to subscribers
//!
//! Split out of the client so listeners can be registered, removed and
//! exercised without a live WebSocket.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::protocol::{CDPEvent, SubscriptionId};

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// Routes events by method name to registered callbacks
pub struct EventRouter {
    next_id: AtomicU64,

    /// Key: method name (e.g., "Page.loadEventFired"), Value: callbacks
    subscribers: DashMap<String, Vec<(SubscriptionId, EventCallback)>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
        }
    }

    /// Register a callback for a method. Keep the returned id to unsubscribe.
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .entry(method.into())
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, method: &str, id: SubscriptionId) -> bool {
        let mut removed = false;
        if let Some(mut callbacks) = self.subscribers.get_mut(method) {
            let before = callbacks.len();
            callbacks.retain(|(sub_id, _)| *sub_id != id);
            removed = callbacks.len() != before;
        }
        self.subscribers.remove_if(method, |_, callbacks| callbacks.is_empty());
        removed
    }

    /// Deliver an event to every subscriber of its method
    pub fn dispatch(&self, event: &CDPEvent) {
        // Clone the callbacks out so a callback may (un)subscribe without
        // deadlocking on the shard lock.
        let callbacks: Vec<EventCallback> = match self.subscribers.get(&event.method) {
            Some(entry) => entry.value().iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        };

        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// Number of live subscriptions, across all methods
    pub fn subscription_count(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(method: &str) -> CDPEvent {
        CDPEvent {
            method: method.to_string(),
            params: None,
            session_id: None,
        }
    }

    #[test]
    fn test_dispatch_by_method() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        router.subscribe(
            "Page.loadEventFired",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        router.dispatch(&event("Page.loadEventFired"));
        router.dispatch(&event("Network.loadingFailed"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = router.subscribe(
            "Network.loadingFailed",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(router.subscription_count(), 1);

        assert!(router.unsubscribe("Network.loadingFailed", id));
        assert!(!router.unsubscribe("Network.loadingFailed", id));
        assert_eq!(router.subscription_count(), 0);

        router.dispatch(&event("Network.loadingFailed"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let router = Arc::new(EventRouter::new());
        let slot = Arc::new(AtomicU64::new(0));

        let inner_router = router.clone();
        let inner_slot = slot.clone();
        let id = router.subscribe(
            "Target.targetCreated",
            Arc::new(move |_| {
                let id = inner_slot.load(Ordering::SeqCst);
                inner_router.unsubscribe("Target.targetCreated", id);
            }),
        );
        slot.store(id, Ordering::SeqCst);

        router.dispatch(&event("Target.targetCreated"));
        assert_eq!(router.subscription_count(), 0);
    }
}
