//! Scripted page for driving the flows without a browser
//!
//! Pages are described as effects applied on navigation (per URL) or on
//! clicks (per selector). Waits poll the scripted state, so tests run with
//! paused time and can change the page from another task.

use async_trait::async_trait;
use browser::{BrowserError, Nth, PageDriver, Result, UrlCondition};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POLL: Duration = Duration::from_millis(100);

/// A change to the scripted page
#[derive(Debug, Clone)]
pub enum Effect {
    Url(String),
    Show(String, usize),
    Style(String, String, String),
    Texts(String, Vec<String>),
    Checked(String, bool),
    /// Make the navigation that applies this fail
    Fail(String),
}

impl Effect {
    pub fn url(url: &str) -> Self {
        Effect::Url(url.to_string())
    }

    pub fn show(selector: &str) -> Self {
        Effect::Show(selector.to_string(), 1)
    }

    pub fn background(selector: &str, value: &str) -> Self {
        Effect::Style(
            selector.to_string(),
            "background-color".to_string(),
            value.to_string(),
        )
    }

    pub fn texts(selector: &str, texts: &[&str]) -> Self {
        Effect::Texts(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        )
    }
}

/// What the flow did to the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Goto(String),
    Click(String, Nth),
    ClickText(String, String),
    NavigatingClick(String),
    Typed(String, String),
}

#[derive(Default)]
struct State {
    url: String,
    elements: HashMap<String, usize>,
    styles: HashMap<(String, String), String>,
    texts: HashMap<String, Vec<String>>,
    checked: HashMap<String, bool>,

    /// Scenes per URL; the last one repeats
    routes: HashMap<String, VecDeque<Vec<Effect>>>,
    /// Effects per click, same queueing as routes
    clicks: HashMap<String, VecDeque<Vec<Effect>>>,
    actions: Vec<Action>,
}

impl State {
    fn apply(&mut self, effects: &[Effect]) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::Url(url) => self.url = url.clone(),
                Effect::Show(selector, count) => {
                    self.elements.insert(selector.clone(), *count);
                }
                Effect::Style(selector, property, value) => {
                    self.elements.entry(selector.clone()).or_insert(1);
                    self.styles
                        .insert((selector.clone(), property.clone()), value.clone());
                }
                Effect::Texts(selector, texts) => {
                    self.elements.insert(selector.clone(), texts.len());
                    self.texts.insert(selector.clone(), texts.clone());
                }
                Effect::Checked(selector, checked) => {
                    self.elements.entry(selector.clone()).or_insert(1);
                    self.checked.insert(selector.clone(), *checked);
                }
                Effect::Fail(reason) => return Err(BrowserError::Navigation(reason.clone())),
            }
        }
        Ok(())
    }

    fn count(&self, selector: &str) -> usize {
        self.elements.get(selector).copied().unwrap_or(0)
    }

    fn style(&self, selector: &str, property: &str) -> Option<String> {
        if self.count(selector) == 0 {
            return None;
        }
        self.styles
            .get(&(selector.to_string(), property.to_string()))
            .cloned()
    }

    fn click(&mut self, key: &str) {
        let effects = match self.clicks.get_mut(key) {
            Some(scripts) if scripts.len() > 1 => scripts.pop_front(),
            Some(scripts) => scripts.front().cloned(),
            None => None,
        };
        if let Some(effects) = effects {
            // Click effects never fail
            let _ = self.apply(&effects);
        }
    }
}

#[derive(Clone, Default)]
pub struct ScriptedPage {
    state: Arc<Mutex<State>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script what loading `url` shows. Repeated calls queue scenes for
    /// successive visits.
    pub fn route(&self, url: &str, effects: Vec<Effect>) {
        self.lock()
            .routes
            .entry(url.to_string())
            .or_default()
            .push_back(effects);
    }

    /// Script what clicking `selector` does, replacing earlier scripts
    pub fn on_click(&self, selector: &str, effects: Vec<Effect>) {
        self.lock()
            .clicks
            .insert(selector.to_string(), VecDeque::from([effects]));
    }

    /// Script the click after the ones already scripted for `selector`.
    /// The last script repeats.
    pub fn then_on_click(&self, selector: &str, effects: Vec<Effect>) {
        self.lock()
            .clicks
            .entry(selector.to_string())
            .or_default()
            .push_back(effects);
    }

    /// Script what clicking the `selector` match reading `text` does
    pub fn on_click_text(&self, selector: &str, text: &str, effects: Vec<Effect>) {
        self.lock()
            .clicks
            .insert(text_key(selector, text), VecDeque::from([effects]));
    }

    pub fn set_url(&self, url: &str) {
        self.lock().url = url.to_string();
    }

    pub fn apply(&self, effects: &[Effect]) {
        let _ = self.lock().apply(effects);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn visits(&self, url: &str) -> usize {
        self.lock()
            .actions
            .iter()
            .filter(|a| matches!(a, Action::Goto(u) if u == url))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    async fn wait_until<T>(
        &self,
        timeout: Duration,
        what: String,
        mut check: impl FnMut(&State) -> Option<T> + Send,
    ) -> Result<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let found = check(&self.lock());
            if let Some(value) = found {
                return Ok(value);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::WaitTimeout { what, timeout });
            }
            tokio::time::sleep(POLL).await;
        }
    }
}

fn text_key(selector: &str, text: &str) -> String {
    format!("{} >> {}", selector, text)
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.lock();
        state.actions.push(Action::Goto(url.to_string()));
        state.url = url.to_string();
        state.elements.clear();
        state.styles.clear();
        state.texts.clear();
        state.checked.clear();

        let scene = match state.routes.get_mut(url) {
            Some(scenes) if scenes.len() > 1 => scenes.pop_front(),
            Some(scenes) => scenes.front().cloned(),
            None => None,
        };
        match scene {
            Some(effects) => state.apply(&effects),
            None => Ok(()),
        }
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.wait_until(timeout, format!("selector {}", selector), |s| {
            (s.count(selector) > 0).then_some(())
        })
        .await
    }

    async fn wait_for_url(&self, condition: &UrlCondition, timeout: Duration) -> Result<()> {
        self.wait_until(timeout, format!("{:?}", condition), |s| {
            condition.matches(&s.url).then_some(())
        })
        .await
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<Option<String>> {
        Ok(self.lock().style(selector, property))
    }

    async fn text_contents(&self, selector: &str) -> Result<Vec<String>> {
        let state = self.lock();
        Ok(match state.texts.get(selector) {
            Some(texts) => texts.clone(),
            None => vec![String::new(); state.count(selector)],
        })
    }

    async fn click(&self, selector: &str, nth: Nth) -> Result<()> {
        let mut state = self.lock();
        if nth.resolve(state.count(selector)).is_none() {
            return Err(BrowserError::ElementNotFound(format!("{} ({:?})", selector, nth)));
        }
        state.actions.push(Action::Click(selector.to_string(), nth));
        state.click(selector);
        Ok(())
    }

    async fn click_with_text(&self, selector: &str, text: &str) -> Result<bool> {
        let mut state = self.lock();
        let found = state
            .texts
            .get(selector)
            .is_some_and(|texts| texts.iter().any(|t| t.trim() == text));
        if found {
            state
                .actions
                .push(Action::ClickText(selector.to_string(), text.to_string()));
            state.click(&text_key(selector, text));
        }
        Ok(found)
    }

    async fn click_and_wait_for_navigation(&self, selector: &str, timeout: Duration) -> Result<()> {
        let before = {
            let mut state = self.lock();
            if state.count(selector) == 0 {
                return Err(BrowserError::ElementNotFound(selector.to_string()));
            }
            state
                .actions
                .push(Action::NavigatingClick(selector.to_string()));
            let before = state.url.clone();
            state.click(selector);
            before
        };
        self.wait_until(timeout, "navigation".to_string(), |s| {
            (s.url != before).then_some(())
        })
        .await
    }

    async fn is_checked(&self, selector: &str) -> Result<bool> {
        let state = self.lock();
        if state.count(selector) == 0 {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        Ok(state.checked.get(selector).copied().unwrap_or(false))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        if state.count(selector) == 0 {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        state
            .actions
            .push(Action::Typed(selector.to_string(), text.to_string()));
        Ok(())
    }
}
