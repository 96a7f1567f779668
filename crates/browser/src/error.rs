//! Error types for browser operations
//!
//! One flat enum for the whole crate. Callers that need to branch on the
//! kind of failure use the classifiers, not string matching.

use std::time::Duration;

use thiserror::Error;

use crate::cdp::protocol::RequestId;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("CDP command '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Connection closed")]
    Closed,

    #[error("Invalid response for request {0}")]
    InvalidResponse(RequestId),

    #[error("Timed out after {timeout:?} waiting for {what}")]
    WaitTimeout { what: String, timeout: Duration },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("JavaScript exception: {0}")]
    JsException(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("DevTools endpoint discovery failed: {0}")]
    Discovery(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not connected")]
    NotConnected,
}

impl BrowserError {
    /// Errors raised because a node went away between lookup and use.
    pub fn is_detached(&self) -> bool {
        match self {
            BrowserError::Protocol { message, .. } => message.contains("detached"),
            BrowserError::JsException(message) | BrowserError::NotInteractable(message) => {
                message.contains("detached")
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BrowserError::Timeout { .. } | BrowserError::WaitTimeout { .. }
        )
    }

    /// The page's execution context was torn down by a navigation.
    pub fn is_context_lost(&self) -> bool {
        match self {
            BrowserError::Protocol { message, .. } | BrowserError::JsException(message) => {
                message.contains("Execution context was destroyed")
                    || message.contains("Cannot find context")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_classification() {
        let err = BrowserError::Protocol {
            code: -32000,
            message: "Node is detached from document".to_string(),
        };
        assert!(err.is_detached());
        assert!(BrowserError::JsException("Element is detached".into()).is_detached());
        assert!(!BrowserError::ElementNotFound("#terms".into()).is_detached());
    }

    #[test]
    fn test_timeout_classification() {
        let err = BrowserError::WaitTimeout {
            what: "selector #terms".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(err.is_timeout());
        assert!(!BrowserError::Closed.is_timeout());
    }

    #[test]
    fn test_context_lost() {
        let err = BrowserError::Protocol {
            code: -32000,
            message: "Execution context was destroyed.".to_string(),
        };
        assert!(err.is_context_lost());
        assert!(!BrowserError::NotConnected.is_context_lost());
    }
}
