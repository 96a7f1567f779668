//! CDP Session - Represents a connection to a specific browser target
//!
//! Design: Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the same WebSocket - no per-session connection overhead.

use super::client::CDPClient;
use super::protocol::{AttachToTargetResult, SessionId, TargetId, TargetInfo};
use crate::error::Result;
use serde_json::{json, Value};
use std::sync::Arc;

/// Domains a page session needs for navigation, DOM scripting and network observation
pub const PAGE_DOMAINS: &[&str] = &["Page", "DOM", "Runtime", "Network"];

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    /// Shared CDP client
    client: Arc<CDPClient>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,

    /// Cached target info
    pub title: String,
    pub url: String,
}

impl CDPSession {
    /// Attach to a target and create session
    pub async fn attach(
        client: Arc<CDPClient>,
        target_id: TargetId,
        domains: Option<&[&str]>,
    ) -> Result<Self> {
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;
        let session_id = attach_result.session_id;

        enable_domains(&client, &session_id, domains.unwrap_or(PAGE_DOMAINS)).await;

        let info_result = client
            .send_request(
                "Target.getTargetInfo",
                Some(json!({ "targetId": &target_id })),
                None,
            )
            .await?;

        let target_info: TargetInfo = serde_json::from_value(info_result["targetInfo"].clone())?;

        Ok(Self {
            client,
            target_id,
            session_id,
            title: target_info.title,
            url: target_info.url,
        })
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Shared client this session multiplexes over
    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }
}

/// Enable CDP domains for a session in parallel. Individual failures are
/// logged and tolerated.
pub async fn enable_domains(client: &Arc<CDPClient>, session_id: &SessionId, domains: &[&str]) {
    let enable_futures: Vec<_> = domains
        .iter()
        .map(|domain| {
            let client = client.clone();
            let session_id = session_id.clone();
            async move {
                client
                    .send_request(format!("{}.enable", domain), None, Some(session_id))
                    .await
            }
        })
        .collect();

    let results = futures_util::future::join_all(enable_futures).await;
    let failures = results.iter().filter(|r| r.is_err()).count();
    if failures > 0 {
        tracing::warn!("Some domain enables failed: {}/{}", failures, results.len());
    }
}
