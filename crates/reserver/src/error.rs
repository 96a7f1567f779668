//! Error types for the reservation flow

use browser::BrowserError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReserveError>;

#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("Invalid date {0:?}. Please use YYYY-MM-DD format. Ex. 2025-02-17")]
    InvalidDate(String),

    #[error("Missing credentials: provide an email and password")]
    MissingCredentials,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Could not find {0}")]
    ElementMissing(String),

    #[error("SMS verification failed or timed out")]
    SmsVerification,

    #[error("Reservation failed at '{step}': {source}")]
    Commit {
        step: &'static str,
        #[source]
        source: Box<ReserveError>,
    },

    #[error("Failed to send text message: {0}")]
    Notify(#[from] reqwest::Error),
}

impl ReserveError {
    /// Wrap a failure inside the purchase sequence
    pub fn commit(step: &'static str, source: impl Into<ReserveError>) -> Self {
        ReserveError::Commit {
            step,
            source: Box::new(source.into()),
        }
    }

    /// Errors from DOM nodes re-rendered out from under us
    pub fn is_detached(&self) -> bool {
        match self {
            ReserveError::Browser(e) => e.is_detached(),
            ReserveError::Commit { source, .. } => source.is_detached(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_commit_wraps_browser_error() {
        let err = ReserveError::commit(
            "confirmation modal",
            BrowserError::WaitTimeout {
                what: "selector .modals".to_string(),
                timeout: Duration::from_secs(10),
            },
        );
        assert!(matches!(err, ReserveError::Commit { step: "confirmation modal", .. }));
        assert!(err.to_string().starts_with("Reservation failed at 'confirmation modal'"));
    }

    #[test]
    fn test_detached_passes_through() {
        let err = ReserveError::from(BrowserError::JsException(
            "TypeError: node is detached".to_string(),
        ));
        assert!(err.is_detached());
        assert!(!ReserveError::SmsVerification.is_detached());
    }
}
