//! Rate-limit sentinel
//!
//! Watches network failures on every page of the session. The site's API
//! answers too many requests with a CORS failure, which Chrome reports as
//! `net::ERR_FAILED` on the request. The first such failure flips a flag
//! and fires the recovery hook; later ones are only logged.

use async_trait::async_trait;
use browser::cdp::{CDPEvent, EventRouter, SubscriptionId};
use browser::{BrowserEvent, CDPClient, CDPSession, Watchdog};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::site::RateLimitRule;

/// Called once, from the CDP reader task, when rate limiting is first seen.
/// Must not block.
pub type RecoveryHook = Arc<dyn Fn() + Send + Sync>;

const WATCHED: [&str; 6] = [
    "Network.requestWillBeSent",
    "Network.loadingFinished",
    "Network.loadingFailed",
    "Target.targetCreated",
    "Target.attachedToTarget",
    "Target.detachedFromTarget",
];

struct Inner {
    rule: RateLimitRule,
    hook: RecoveryHook,
    flagged: AtomicBool,
    detached: AtomicBool,
    failures: AtomicUsize,

    /// In-flight requests, `target:requestId` -> URL. `loadingFailed` does
    /// not carry the URL.
    requests: DashMap<String, String>,

    /// Session id -> target id. A page watched through two sessions reports
    /// each request twice under the same key; only the first report counts.
    sessions: DashMap<String, String>,

    router: Mutex<Option<Arc<EventRouter>>>,
    subscriptions: Mutex<Vec<(&'static str, SubscriptionId)>>,
}

/// Single-shot rate-limit detector. Clones share state.
#[derive(Clone)]
pub struct RateLimitSentinel {
    inner: Arc<Inner>,
}

impl RateLimitSentinel {
    pub fn new(rule: RateLimitRule, hook: RecoveryHook) -> Self {
        Self {
            inner: Arc::new(Inner {
                rule,
                hook,
                flagged: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                failures: AtomicUsize::new(0),
                requests: DashMap::new(),
                sessions: DashMap::new(),
                router: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Has rate limiting been observed this run?
    pub fn rate_limited(&self) -> bool {
        self.inner.flagged.load(Ordering::SeqCst)
    }

    /// Matching failures seen, including ones after the first
    pub fn failures_seen(&self) -> usize {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Start listening on `router`. New page targets get a Network-enabled
    /// session through `client` so their traffic is seen too.
    pub fn attach(&self, router: Arc<EventRouter>, client: Weak<CDPClient>) {
        let mut subscriptions = lock(&self.inner.subscriptions);
        for method in WATCHED {
            let inner = Arc::downgrade(&self.inner);
            let client = client.clone();
            let id = router.subscribe(
                method,
                Arc::new(move |event: CDPEvent| {
                    if let Some(inner) = inner.upgrade() {
                        inner.handle(&event, &client);
                    }
                }),
            );
            subscriptions.push((method, id));
        }
        *lock(&self.inner.router) = Some(router);
        self.inner.detached.store(false, Ordering::SeqCst);
        tracing::debug!("Rate-limit sentinel attached");
    }

    /// Feed one failed request. Returns true when this call raised the flag.
    pub fn observe(&self, url: &str, error_text: &str) -> bool {
        self.inner.observe(url, error_text)
    }

    /// Remove every listener and forget in-flight requests. Safe to call
    /// more than once.
    pub fn cleanup(&self) {
        self.inner.detached.store(true, Ordering::SeqCst);
        let router = lock(&self.inner.router).take();
        let subscriptions: Vec<_> = lock(&self.inner.subscriptions).drain(..).collect();
        if let Some(router) = router {
            for (method, id) in subscriptions {
                router.unsubscribe(method, id);
            }
        }
        self.inner.requests.clear();
        self.inner.sessions.clear();
    }
}

impl Inner {
    fn handle(&self, event: &CDPEvent, client: &Weak<CDPClient>) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }
        let Some(params) = event.params.as_ref() else {
            return;
        };

        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                if let (Some(id), Some(url)) = (
                    params["requestId"].as_str(),
                    params["request"]["url"].as_str(),
                ) {
                    self.requests.insert(self.request_key(event, id), url.to_string());
                }
            }
            "Network.loadingFinished" => {
                if let Some(id) = params["requestId"].as_str() {
                    self.requests.remove(&self.request_key(event, id));
                }
            }
            "Network.loadingFailed" => {
                let Some(id) = params["requestId"].as_str() else {
                    return;
                };
                let error_text = params["errorText"].as_str().unwrap_or_default();
                if let Some((_, url)) = self.requests.remove(&self.request_key(event, id)) {
                    self.observe(&url, error_text);
                }
            }
            "Target.targetCreated" => {
                let info = &params["targetInfo"];
                if info["type"].as_str() != Some("page") {
                    return;
                }
                let (Some(target_id), Some(client)) = (info["targetId"].as_str(), client.upgrade())
                else {
                    return;
                };
                if self.has_session(target_id) {
                    return;
                }
                watch_target(client, target_id.to_string());
            }
            "Target.attachedToTarget" => {
                if let (Some(session_id), Some(target_id)) = (
                    params["sessionId"].as_str(),
                    params["targetInfo"]["targetId"].as_str(),
                ) {
                    self.sessions.insert(session_id.to_string(), target_id.to_string());
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(session_id) = params["sessionId"].as_str() {
                    self.sessions.remove(session_id);
                }
            }
            _ => {}
        }
    }

    fn has_session(&self, target_id: &str) -> bool {
        self.sessions.iter().any(|entry| entry.value() == target_id)
    }

    /// Requests are keyed by target when the session is known, else by session
    fn request_key(&self, event: &CDPEvent, request_id: &str) -> String {
        let session_id = event.session_id.as_deref().unwrap_or_default();
        match self.sessions.get(session_id) {
            Some(target_id) => format!("{}:{}", target_id.value(), request_id),
            None => format!("{}:{}", session_id, request_id),
        }
    }

    fn observe(&self, url: &str, error_text: &str) -> bool {
        if self.detached.load(Ordering::SeqCst) || !self.rule.matches(url, error_text) {
            return false;
        }
        let seen = self.failures.fetch_add(1, Ordering::SeqCst) + 1;

        if self
            .flagged
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(url, seen, "Rate limited again");
            return false;
        }

        tracing::warn!(url, error_text, "Rate limited by the booking API, recovering");
        (self.hook)();
        true
    }
}

/// Give a new page a session with Network enabled
fn watch_target(client: Arc<CDPClient>, target_id: String) {
    tokio::spawn(async move {
        match CDPSession::attach(client, target_id.clone(), Some(&["Network"][..])).await {
            Ok(_) => tracing::debug!(target = %target_id, "Watching network of new page"),
            Err(e) => tracing::debug!(target = %target_id, "Could not watch new page: {}", e),
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Watchdog for RateLimitSentinel {
    fn name(&self) -> &str {
        "RateLimitSentinel"
    }

    async fn on_event(&self, event: &BrowserEvent) {
        if let BrowserEvent::Stopped = event {
            self.inner.requests.clear();
        }
    }

    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> browser::Result<()> {
        self.attach(cdp_client.events().clone(), Arc::downgrade(&cdp_client));
        Ok(())
    }

    async fn on_detach(&self) -> browser::Result<()> {
        self.cleanup();
        Ok(())
    }
}
