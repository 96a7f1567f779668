//! Browser Session Management
//!
//! The high-level handle a run owns: brings a browser up (launching one or
//! attaching to an existing endpoint), hands out pages, and tears it all down.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::cdp::protocol::{TargetId, TargetInfos};
use crate::cdp::session::PAGE_DOMAINS;
use crate::cdp::{CDPClient, CDPSession};
use crate::error::{BrowserError, Result};
use crate::events::{BrowserEvent, EventBus};
use crate::launcher::{self, ChromeProcess, LaunchOptions};
use crate::page::{Page, PageOptions};
use crate::watchdog::{Watchdog, WatchdogManager};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub id: String,
    /// Existing browser to attach to: a `ws://` endpoint, or an `http://`
    /// base serving `/json/version`. A local Chrome is launched when unset.
    pub cdp_url: Option<String>,
    pub launch: LaunchOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: None,
            launch: LaunchOptions::default(),
        }
    }
}

/// Browser Session - manages connection to Chrome and its pages
pub struct BrowserSession {
    pub config: SessionConfig,
    pub event_bus: EventBus,
    page_options: PageOptions,

    // CDP infrastructure
    cdp_client: Arc<RwLock<Option<Arc<CDPClient>>>>,

    /// Chrome we launched ourselves, if any
    chrome: Mutex<Option<ChromeProcess>>,

    watchdog_manager: Arc<RwLock<WatchdogManager>>,
}

impl BrowserSession {
    pub fn new(config: SessionConfig) -> Self {
        let page_options = PageOptions {
            viewport: config.launch.window,
            ..PageOptions::default()
        };

        Self {
            config,
            event_bus: EventBus::new(),
            page_options,
            cdp_client: Arc::new(RwLock::new(None)),
            chrome: Mutex::new(None),
            watchdog_manager: Arc::new(RwLock::new(WatchdogManager::new())),
        }
    }

    pub fn with_page_options(mut self, page_options: PageOptions) -> Self {
        self.page_options = page_options;
        self
    }

    /// Register a watchdog. Must happen before `start` to see the attach.
    pub async fn add_watchdog(&self, watchdog: Box<dyn Watchdog>) {
        self.watchdog_manager.write().await.register(watchdog);
    }

    /// Start the browser session
    pub async fn start(&self) -> Result<()> {
        let ws_url = match &self.config.cdp_url {
            Some(url) if url.starts_with("ws") => url.clone(),
            Some(base) => {
                launcher::discover_ws_url(
                    base,
                    self.config.launch.discovery_interval,
                    self.config.launch.discovery_timeout,
                )
                .await?
            }
            None => {
                let process = launcher::launch(&self.config.launch).await?;
                let ws_url = process.ws_url.clone();
                *self.chrome.lock().await = Some(process);
                ws_url
            }
        };

        let client = CDPClient::connect(&ws_url).await?;
        *self.cdp_client.write().await = Some(client.clone());

        // Surface pages opened later (popups, new tabs) to watchdogs
        client
            .send_request(
                "Target.setDiscoverTargets",
                Some(json!({ "discover": true })),
                None,
            )
            .await?;

        self.watchdog_manager
            .read()
            .await
            .attach_all(client)
            .await?;

        tracing::info!(session = %self.config.id, "Browser session started");
        self.publish(BrowserEvent::Started).await;

        Ok(())
    }

    /// Stop the browser session. Teardown keeps going past individual
    /// failures; the first one is reported.
    pub async fn stop(&self) -> Result<()> {
        let mut first_error = None;

        if let Err(e) = self.watchdog_manager.read().await.detach_all().await {
            first_error.get_or_insert(e);
        }

        if let Some(client) = self.cdp_client.write().await.take() {
            if self.chrome.lock().await.is_some() {
                // Chrome drops the socket as it exits, so no reply is expected
                let _ = client.send_request("Browser.close", None, None).await;
            }
            if let Err(e) = client.close().await {
                tracing::debug!("CDP close: {}", e);
            }
        }

        if let Some(process) = self.chrome.lock().await.take() {
            if let Err(e) = process.kill().await {
                first_error.get_or_insert(e);
            }
        }

        tracing::info!(session = %self.config.id, "Browser session stopped");
        self.publish(BrowserEvent::Stopped).await;

        first_error.map_or(Ok(()), Err)
    }

    /// Attach to the browser's first page, creating one if there is none
    pub async fn open_page(&self) -> Result<Page> {
        let client = self.client().await?;

        let targets: TargetInfos =
            serde_json::from_value(client.send_request("Target.getTargets", None, None).await?)?;

        let target_id = match targets
            .target_infos
            .into_iter()
            .find(|t| t.target_type == "page")
        {
            Some(existing) => existing.target_id,
            None => self.create_target(&client).await?,
        };

        self.attach_page(client, target_id).await
    }

    async fn attach_page(&self, client: Arc<CDPClient>, target_id: TargetId) -> Result<Page> {
        let session = CDPSession::attach(client, target_id.clone(), Some(PAGE_DOMAINS)).await?;
        tracing::debug!(target = %target_id, url = %session.url, title = %session.title, "Page attached");
        let page = Page::new(session, self.event_bus.clone(), self.page_options.clone()).await?;

        self.publish(BrowserEvent::TabCreated { target_id }).await;

        Ok(page)
    }

    async fn create_target(&self, client: &CDPClient) -> Result<TargetId> {
        let result = client
            .send_request(
                "Target.createTarget",
                Some(json!({ "url": "about:blank" })),
                None,
            )
            .await?;

        result["targetId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Navigation("Target.createTarget returned no targetId".to_string()))
    }

    async fn client(&self) -> Result<Arc<CDPClient>> {
        self.cdp_client
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(BrowserError::NotConnected)
    }

    /// Publish on the bus and dispatch to watchdogs
    async fn publish(&self, event: BrowserEvent) {
        self.event_bus.publish(event.clone());
        self.watchdog_manager
            .read()
            .await
            .dispatch(Arc::new(event))
            .await;
    }
}
