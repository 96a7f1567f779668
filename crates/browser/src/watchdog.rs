//! Watchdog System - observers attached to a browser session
//!
//! A watchdog gets the CDP client when the session starts, sees every
//! lifecycle event, and is detached when the session stops. The manager is
//! just a Vec<Box<dyn Watchdog>>.

use async_trait::async_trait;
use std::sync::Arc;

use crate::cdp::CDPClient;
use crate::error::Result;
use crate::events::BrowserEvent;

/// Watchdog trait - monitors browser state and reacts to events
#[async_trait]
pub trait Watchdog: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Handle browser event
    ///
    /// This is called for EVERY event. Watchdog decides what to care about.
    async fn on_event(&self, event: &BrowserEvent);

    /// Optional: Called when watchdog is first attached
    ///
    /// The watchdog receives a CDPClient reference to subscribe to CDP events
    /// and send CDP commands. Subscriptions made here must be released in
    /// `on_detach`.
    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        let _ = cdp_client;
        Ok(())
    }

    /// Optional: Called when watchdog is detached (session stop)
    async fn on_detach(&self) -> Result<()> {
        Ok(())
    }
}

/// Watchdog manager - dispatches events to all watchdogs
pub struct WatchdogManager {
    watchdogs: Vec<Box<dyn Watchdog>>,
}

impl WatchdogManager {
    pub fn new() -> Self {
        Self {
            watchdogs: Vec::new(),
        }
    }

    /// Add a watchdog
    pub fn register(&mut self, watchdog: Box<dyn Watchdog>) {
        tracing::debug!("Registered watchdog: {}", watchdog.name());
        self.watchdogs.push(watchdog);
    }

    /// Attach all watchdogs
    pub async fn attach_all(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        for watchdog in &self.watchdogs {
            watchdog.on_attach(cdp_client.clone()).await?;
        }
        Ok(())
    }

    /// Detach all watchdogs. Every watchdog gets detached even if one fails;
    /// the first error is returned.
    pub async fn detach_all(&self) -> Result<()> {
        let mut first_error = None;
        for watchdog in &self.watchdogs {
            if let Err(e) = watchdog.on_detach().await {
                tracing::warn!("Failed to detach {}: {}", watchdog.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Dispatch event to all watchdogs concurrently
    pub async fn dispatch(&self, event: Arc<BrowserEvent>) {
        use futures_util::future::join_all;

        let tasks: Vec<_> = self
            .watchdogs
            .iter()
            .map(|w| {
                let event = event.clone();
                async move {
                    w.on_event(&event).await;
                }
            })
            .collect();

        join_all(tasks).await;
    }
}

impl Default for WatchdogManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrowserError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestWatchdog {
        name: String,
        event_count: Arc<AtomicUsize>,
        detach_count: Arc<AtomicUsize>,
        fail_detach: bool,
    }

    impl TestWatchdog {
        fn new(name: &str, events: &Arc<AtomicUsize>, detaches: &Arc<AtomicUsize>) -> Self {
            Self {
                name: name.to_string(),
                event_count: events.clone(),
                detach_count: detaches.clone(),
                fail_detach: false,
            }
        }
    }

    #[async_trait]
    impl Watchdog for TestWatchdog {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_event(&self, _event: &BrowserEvent) {
            self.event_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_detach(&self) -> Result<()> {
            self.detach_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_detach {
                return Err(BrowserError::NotConnected);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_watchdog_dispatch() {
        let counter = Arc::new(AtomicUsize::new(0));
        let detaches = Arc::new(AtomicUsize::new(0));
        let mut manager = WatchdogManager::new();

        manager.register(Box::new(TestWatchdog::new("test1", &counter, &detaches)));
        manager.register(Box::new(TestWatchdog::new("test2", &counter, &detaches)));

        manager.dispatch(Arc::new(BrowserEvent::Started)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detach_continues_past_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let detaches = Arc::new(AtomicUsize::new(0));
        let mut manager = WatchdogManager::new();

        let mut failing = TestWatchdog::new("failing", &counter, &detaches);
        failing.fail_detach = true;
        manager.register(Box::new(failing));
        manager.register(Box::new(TestWatchdog::new("ok", &counter, &detaches)));

        let result = manager.detach_all().await;

        assert!(matches!(result, Err(BrowserError::NotConnected)));
        assert_eq!(detaches.load(Ordering::SeqCst), 2);
    }
}
