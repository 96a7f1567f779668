//! Page - scripted interaction with one browser tab
//!
//! Everything the reservation flow does to a page goes through the
//! [`PageDriver`] trait, so flows can be driven against a fake in tests.
//! [`Page`] is the CDP implementation.
//!
//! Element lookups run as `Runtime.evaluate` expressions that query the DOM
//! fresh on every call. Holding remote node handles across awaits is how you
//! get "node is detached" errors on a re-rendering SPA.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cdp::protocol::SubscriptionId;
use crate::cdp::{CDPSession, EventRouter};
use crate::error::{BrowserError, Result};
use crate::events::{BrowserEvent, EventBus};
use crate::launcher::Viewport;

/// Which of several matching elements to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nth {
    First,
    Last,
    Index(usize),
}

impl Nth {
    /// Position within `len` matches, if there is one
    pub fn resolve(self, len: usize) -> Option<usize> {
        match self {
            Nth::First if len > 0 => Some(0),
            Nth::Last if len > 0 => Some(len - 1),
            Nth::Index(i) if i < len => Some(i),
            _ => None,
        }
    }

    fn to_js(self) -> String {
        match self {
            Nth::First => "0".to_string(),
            Nth::Last => "els.length - 1".to_string(),
            Nth::Index(i) => i.to_string(),
        }
    }
}

/// Predicate over the page URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlCondition {
    StartsWith(String),
    Contains(String),
    NotContains(String),
}

impl UrlCondition {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlCondition::StartsWith(prefix) => url.starts_with(prefix.as_str()),
            UrlCondition::Contains(part) => url.contains(part.as_str()),
            UrlCondition::NotContains(part) => !url.contains(part.as_str()),
        }
    }

    fn to_js(&self) -> String {
        match self {
            UrlCondition::StartsWith(prefix) => {
                format!("window.location.href.startsWith({})", js_str(prefix))
            }
            UrlCondition::Contains(part) => {
                format!("window.location.href.includes({})", js_str(part))
            }
            UrlCondition::NotContains(part) => {
                format!("!window.location.href.includes({})", js_str(part))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            UrlCondition::StartsWith(prefix) => format!("URL starting with {}", prefix),
            UrlCondition::Contains(part) => format!("URL containing {}", part),
            UrlCondition::NotContains(part) => format!("URL without {}", part),
        }
    }
}

/// The page operations the reservation flows need
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait until the network goes idle
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Wait for an element matching `selector` to be visible
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_url(&self, condition: &UrlCondition, timeout: Duration) -> Result<()>;

    /// Computed style of the first match, `None` if nothing matches
    async fn computed_style(&self, selector: &str, property: &str) -> Result<Option<String>>;

    /// `textContent` of every match
    async fn text_contents(&self, selector: &str) -> Result<Vec<String>>;

    /// Mouse click on the center of the chosen match
    async fn click(&self, selector: &str, nth: Nth) -> Result<()>;

    /// Click the first match whose trimmed text equals `text`. Returns false
    /// when there is no such element.
    async fn click_with_text(&self, selector: &str, text: &str) -> Result<bool>;

    /// Click the first match and wait for the navigation it triggers
    async fn click_and_wait_for_navigation(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn is_checked(&self, selector: &str) -> Result<bool>;

    /// Focus the first match and type `text` key by key
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;
}

/// Tunables for a [`Page`]
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub viewport: Viewport,
    pub navigation_timeout: Duration,
    /// Interval between evaluations while waiting on a condition
    pub poll_interval: Duration,
    /// Delay between typed characters
    pub typing_delay: Duration,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            navigation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            typing_delay: Duration::from_millis(2),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClickPoint {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// A browser tab driven over CDP
#[derive(Clone)]
pub struct Page {
    session: CDPSession,
    events: Arc<EventRouter>,
    bus: EventBus,
    frame_id: String,
    options: PageOptions,
}

impl Page {
    /// Wrap an attached session: enable lifecycle events, find the main
    /// frame and apply the viewport
    pub async fn new(session: CDPSession, bus: EventBus, options: PageOptions) -> Result<Self> {
        session
            .send(
                "Page.setLifecycleEventsEnabled",
                Some(json!({ "enabled": true })),
            )
            .await?;

        let tree = session.send("Page.getFrameTree", None).await?;
        let frame_id = tree["frameTree"]["frame"]["id"]
            .as_str()
            .unwrap_or(&session.target_id)
            .to_string();

        let events = session.client().events().clone();
        let page = Self {
            session,
            events,
            bus,
            frame_id,
            options,
        };
        page.set_viewport(page.options.viewport).await?;
        Ok(page)
    }

    pub fn target_id(&self) -> &str {
        &self.session.target_id
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.session
            .send(
                "Emulation.setDeviceMetricsOverride",
                Some(json!({
                    "width": viewport.width,
                    "height": viewport.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                })),
            )
            .await?;
        Ok(())
    }

    /// Evaluate an expression and return its value by value
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .session
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("unknown exception")
                .to_string();
            return Err(BrowserError::JsException(message));
        }

        Ok(result["result"]["value"].clone())
    }

    /// Re-evaluate `expression` until it yields something truthy
    async fn poll_until(&self, expression: &str, timeout: Duration, what: String) -> Result<Value> {
        let attempt = async {
            loop {
                match self.evaluate(expression).await {
                    Ok(value) if is_truthy(&value) => return Ok(value),
                    Ok(_) => {}
                    // Navigation in flight; the next evaluation lands in the new document
                    Err(e) if e.is_context_lost() => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.options.poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| BrowserError::WaitTimeout { what, timeout })?
    }

    fn navigation_waiter(&self) -> NavigationWaiter {
        NavigationWaiter::new(
            self.events.clone(),
            self.session.session_id.clone(),
            self.frame_id.clone(),
        )
    }

    async fn dispatch_click(&self, point: &ClickPoint) -> Result<()> {
        for event_type in ["mouseMoved", "mousePressed", "mouseReleased"] {
            self.session
                .send(
                    "Input.dispatchMouseEvent",
                    Some(json!({
                        "type": event_type,
                        "x": point.x,
                        "y": point.y,
                        "button": "left",
                        "clickCount": 1,
                    })),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for Page {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut waiter = self.navigation_waiter();
        self.bus.publish(BrowserEvent::NavigationStarted {
            url: url.to_string(),
        });

        let result = self
            .session
            .send("Page.navigate", Some(json!({ "url": url })))
            .await?;

        if let Some(error_text) = result["errorText"].as_str().filter(|t| !t.is_empty()) {
            return Err(BrowserError::Navigation(format!("{}: {}", url, error_text)));
        }

        // No loaderId means a same-document navigation, which is already done
        if let Some(loader_id) = result["loaderId"].as_str() {
            waiter
                .wait(Some(loader_id), self.options.navigation_timeout)
                .await?;
        }

        self.bus.publish(BrowserEvent::NavigationComplete {
            url: url.to_string(),
        });
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::JsException("location.href is not a string".to_string()))
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let expression = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                return style.visibility !== 'hidden' && rect.width > 0 && rect.height > 0;
            }})()"#,
            sel = js_str(selector)
        );
        self.poll_until(&expression, timeout, format!("selector {}", selector))
            .await?;
        Ok(())
    }

    async fn wait_for_url(&self, condition: &UrlCondition, timeout: Duration) -> Result<()> {
        self.poll_until(&condition.to_js(), timeout, condition.describe())
            .await?;
        Ok(())
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<Option<String>> {
        let value = self.evaluate(&computed_style_js(selector, property)).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn text_contents(&self, selector: &str) -> Result<Vec<String>> {
        let expression = format!(
            "Array.from(document.querySelectorAll({})).map(el => el.textContent || '')",
            js_str(selector)
        );
        let value = self.evaluate(&expression).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn click(&self, selector: &str, nth: Nth) -> Result<()> {
        let expression = format!(
            r#"(() => {{
                const els = document.querySelectorAll({sel});
                const el = els[{index}];
                if (!el) return null;
                el.scrollIntoView({{ block: 'center', inline: 'center' }});
                const rect = el.getBoundingClientRect();
                return {{ x: rect.left + rect.width / 2, y: rect.top + rect.height / 2, width: rect.width, height: rect.height }};
            }})()"#,
            sel = js_str(selector),
            index = nth.to_js()
        );

        let value = self.evaluate(&expression).await?;
        if value.is_null() {
            return Err(BrowserError::ElementNotFound(format!("{} ({:?})", selector, nth)));
        }

        let point: ClickPoint = serde_json::from_value(value)?;
        if point.width <= 0.0 || point.height <= 0.0 {
            return Err(BrowserError::NotInteractable(format!(
                "{} has zero size {}x{}",
                selector, point.width, point.height
            )));
        }

        tracing::debug!(selector, x = point.x, y = point.y, "Clicking");
        self.dispatch_click(&point).await
    }

    async fn click_with_text(&self, selector: &str, text: &str) -> Result<bool> {
        let expression = format!(
            r#"(() => {{
                const el = Array.from(document.querySelectorAll({sel}))
                    .find(el => (el.textContent || '').trim() === {text});
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            sel = js_str(selector),
            text = js_str(text)
        );
        Ok(self.evaluate(&expression).await?.as_bool().unwrap_or(false))
    }

    async fn click_and_wait_for_navigation(&self, selector: &str, timeout: Duration) -> Result<()> {
        let mut waiter = self.navigation_waiter();
        self.click(selector, Nth::First).await?;
        waiter.wait(None, timeout).await
    }

    async fn is_checked(&self, selector: &str) -> Result<bool> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); return el ? !!el.checked : null; }})()",
            js_str(selector)
        );
        match self.evaluate(&expression).await? {
            Value::Bool(checked) => Ok(checked),
            _ => Err(BrowserError::ElementNotFound(selector.to_string())),
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.focus(); return true; }})()",
            js_str(selector)
        );
        if !self.evaluate(&expression).await?.as_bool().unwrap_or(false) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }

        for ch in text.chars() {
            let key = ch.to_string();
            for event_type in ["keyDown", "keyUp"] {
                self.session
                    .send(
                        "Input.dispatchKeyEvent",
                        Some(json!({
                            "type": event_type,
                            "text": key,
                            "unmodifiedText": key,
                            "key": key,
                        })),
                    )
                    .await?;
            }
            tokio::time::sleep(self.options.typing_delay).await;
        }
        Ok(())
    }
}

/// What the navigation listeners report
#[derive(Debug)]
enum NavSignal {
    Lifecycle { name: String, loader_id: String },
    SameDocument,
}

/// Listens for the main frame settling. Register before triggering the
/// navigation so no event is missed; listeners are removed on drop.
struct NavigationWaiter {
    events: Arc<EventRouter>,
    rx: mpsc::UnboundedReceiver<NavSignal>,
    subscriptions: Vec<(&'static str, SubscriptionId)>,
}

impl NavigationWaiter {
    fn new(events: Arc<EventRouter>, session_id: String, frame_id: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let lifecycle_tx = tx.clone();
        let lifecycle_session = session_id.clone();
        let lifecycle_frame = frame_id.clone();
        let lifecycle = events.subscribe(
            "Page.lifecycleEvent",
            Arc::new(move |event| {
                if event.session_id.as_deref() != Some(lifecycle_session.as_str())
                    || event.param_str("frameId") != Some(lifecycle_frame.as_str())
                {
                    return;
                }
                let _ = lifecycle_tx.send(NavSignal::Lifecycle {
                    name: event.param_str("name").unwrap_or_default().to_string(),
                    loader_id: event.param_str("loaderId").unwrap_or_default().to_string(),
                });
            }),
        );

        let same_document = events.subscribe(
            "Page.navigatedWithinDocument",
            Arc::new(move |event| {
                if event.session_id.as_deref() == Some(session_id.as_str())
                    && event.param_str("frameId") == Some(frame_id.as_str())
                {
                    let _ = tx.send(NavSignal::SameDocument);
                }
            }),
        );

        Self {
            events,
            rx,
            subscriptions: vec![
                ("Page.lifecycleEvent", lifecycle),
                ("Page.navigatedWithinDocument", same_document),
            ],
        }
    }

    /// Wait for network idle of `loader_id`, or of any document (including a
    /// same-document route change) when `None`
    async fn wait(&mut self, loader_id: Option<&str>, timeout: Duration) -> Result<()> {
        let settled = async {
            while let Some(signal) = self.rx.recv().await {
                match signal {
                    NavSignal::Lifecycle { name, loader_id: seen } if name == "networkIdle" => {
                        if loader_id.map_or(true, |expected| expected == seen) {
                            return Ok(());
                        }
                    }
                    NavSignal::SameDocument if loader_id.is_none() => return Ok(()),
                    _ => {}
                }
            }
            Err(BrowserError::Closed)
        };

        tokio::time::timeout(timeout, settled)
            .await
            .map_err(|_| BrowserError::WaitTimeout {
                what: "navigation".to_string(),
                timeout,
            })?
    }
}

impl Drop for NavigationWaiter {
    fn drop(&mut self) {
        for (method, id) in self.subscriptions.drain(..) {
            self.events.unsubscribe(method, id);
        }
    }
}

/// JSON-quote a string for embedding in a JS expression
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn computed_style_js(selector: &str, property: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); return el ? window.getComputedStyle(el).getPropertyValue({}) : null; }})()",
        js_str(selector),
        js_str(property)
    )
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::CDPEvent;

    #[test]
    fn test_nth_resolve() {
        assert_eq!(Nth::First.resolve(3), Some(0));
        assert_eq!(Nth::Last.resolve(3), Some(2));
        assert_eq!(Nth::Index(1).resolve(3), Some(1));
        assert_eq!(Nth::Index(3).resolve(3), None);
        assert_eq!(Nth::First.resolve(0), None);
        assert_eq!(Nth::Last.resolve(0), None);
    }

    #[test]
    fn test_url_condition_matches() {
        let checkout = UrlCondition::StartsWith("https://parking.honkmobile.com/checkout/".into());
        assert!(checkout.matches("https://parking.honkmobile.com/checkout/abc"));
        assert!(!checkout.matches("https://reserve.altaparking.com/checkout/"));

        let purchased = UrlCondition::Contains("?purchased".into());
        assert!(purchased.matches("https://reserve.altaparking.com/parking-codes?purchased=1"));

        let left = UrlCondition::NotContains("/sms-verify".into());
        assert!(!left.matches("https://reserve.altaparking.com/sms-verify"));
        assert!(left.matches("https://reserve.altaparking.com/"));
    }

    #[test]
    fn test_js_str_escapes_quotes() {
        assert_eq!(
            js_str("div[aria-label='Monday, February 17, 2025']"),
            r#""div[aria-label='Monday, February 17, 2025']""#
        );
        assert_eq!(js_str(r#"a"b"#), r#""a\"b""#);
    }

    #[test]
    fn test_truthiness_follows_js() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!("rgba(49, 200, 25, 0.2)")));
        assert!(is_truthy(&json!(true)));
    }

    fn lifecycle(session: &str, frame: &str, name: &str, loader: &str) -> CDPEvent {
        CDPEvent {
            method: "Page.lifecycleEvent".to_string(),
            params: Some(json!({ "frameId": frame, "loaderId": loader, "name": name })),
            session_id: Some(session.to_string()),
        }
    }

    #[tokio::test]
    async fn test_navigation_waiter_filters_by_loader_and_frame() {
        let router = Arc::new(EventRouter::new());
        let mut waiter = NavigationWaiter::new(router.clone(), "S1".into(), "F1".into());

        router.dispatch(&lifecycle("S1", "F1", "networkIdle", "OLD"));
        router.dispatch(&lifecycle("S2", "F1", "networkIdle", "L1"));
        router.dispatch(&lifecycle("S1", "CHILD", "networkIdle", "L1"));
        router.dispatch(&lifecycle("S1", "F1", "load", "L1"));
        router.dispatch(&lifecycle("S1", "F1", "networkIdle", "L1"));

        tokio_test::assert_ok!(waiter.wait(Some("L1"), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_navigation_waiter_accepts_same_document() {
        let router = Arc::new(EventRouter::new());
        let mut waiter = NavigationWaiter::new(router.clone(), "S1".into(), "F1".into());

        router.dispatch(&CDPEvent {
            method: "Page.navigatedWithinDocument".to_string(),
            params: Some(json!({ "frameId": "F1", "url": "https://reserve.altaparking.com/" })),
            session_id: Some("S1".to_string()),
        });

        tokio_test::assert_ok!(waiter.wait(None, Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_waiter_times_out() {
        let router = Arc::new(EventRouter::new());
        let mut waiter = NavigationWaiter::new(router.clone(), "S1".into(), "F1".into());

        router.dispatch(&lifecycle("S1", "F1", "load", "L1"));

        let err = waiter
            .wait(Some("L1"), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_navigation_waiter_unsubscribes_on_drop() {
        let router = Arc::new(EventRouter::new());
        {
            let _waiter = NavigationWaiter::new(router.clone(), "S1".into(), "F1".into());
            assert_eq!(router.subscription_count(), 2);
        }
        assert_eq!(router.subscription_count(), 0);
    }
}
