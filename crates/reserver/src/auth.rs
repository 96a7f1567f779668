//! Login, including the SMS verification step the site sometimes inserts

use browser::{PageDriver, UrlCondition};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::config::Timings;
use crate::error::{ReserveError, Result};
use crate::site::SiteAdapter;

/// Account login. The password never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log in unless the session already is. Fails with
/// [`ReserveError::SmsVerification`] when the site asks for an SMS code that
/// never gets entered.
pub async fn login(
    page: &dyn PageDriver,
    site: &dyn SiteAdapter,
    credentials: &Credentials,
    sms_code: Option<&str>,
    timings: &Timings,
    cancel: &CancellationToken,
) -> Result<()> {
    page.goto(&site.login_url()).await?;

    if !page.current_url().await?.contains(site.login_path()) {
        tracing::debug!("[Auth] Already logged in");
        return Ok(());
    }

    page.wait_for_selector(site.email_input(), timings.navigation_timeout)
        .await?;
    page.type_text(site.email_input(), &credentials.email).await?;

    page.wait_for_selector(site.password_input(), timings.navigation_timeout)
        .await?;
    page.type_text(site.password_input(), credentials.password())
        .await?;

    page.wait_for_selector(site.submit_button(), timings.navigation_timeout)
        .await?;
    page.click_and_wait_for_navigation(site.submit_button(), timings.navigation_timeout)
        .await?;

    if page.current_url().await?.contains(site.sms_verify_path()) {
        tracing::info!("[Auth] Redirected to SMS verification page after login");
        if !handle_sms_verification(page, site, sms_code, timings, cancel).await? {
            return Err(ReserveError::SmsVerification);
        }
    }

    tracing::info!(email = %credentials.email, "[Auth] Successfully logged in");
    Ok(())
}

/// Get past the SMS verification page, if that is where we are.
///
/// With a code it is typed and submitted. Without one, someone has to type
/// it into the browser; we wait for the page to move on. Returns false when
/// verification did not complete.
pub async fn handle_sms_verification(
    page: &dyn PageDriver,
    site: &dyn SiteAdapter,
    sms_code: Option<&str>,
    timings: &Timings,
    cancel: &CancellationToken,
) -> Result<bool> {
    if !page.current_url().await?.contains(site.sms_verify_path()) {
        return Ok(true);
    }
    tracing::info!("[Auth] SMS verification page detected");

    if let Err(e) = page
        .wait_for_selector(site.sms_code_input(), timings.sms_input_timeout)
        .await
    {
        tracing::error!(error = %e, "[Auth] SMS code input never appeared");
        return Ok(false);
    }

    match sms_code {
        Some(code) => submit_sms_code(page, site, code, timings).await,
        None => wait_for_manual_entry(page, site, timings, cancel).await,
    }
}

async fn submit_sms_code(
    page: &dyn PageDriver,
    site: &dyn SiteAdapter,
    code: &str,
    timings: &Timings,
) -> Result<bool> {
    tracing::info!("[Auth] Entering SMS verification code");
    page.type_text(site.sms_code_input(), code).await?;

    if page.text_contents(site.submit_button()).await?.is_empty() {
        tracing::warn!("[Auth] No submit button for the SMS code");
        return Ok(false);
    }

    match page
        .click_and_wait_for_navigation(site.submit_button(), timings.sms_submit_timeout)
        .await
    {
        Ok(()) => {
            tracing::info!("[Auth] SMS verification code submitted");
            Ok(true)
        }
        Err(e) if e.is_timeout() => {
            tracing::error!("[Auth] SMS verification did not navigate away");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn wait_for_manual_entry(
    page: &dyn PageDriver,
    site: &dyn SiteAdapter,
    timings: &Timings,
    cancel: &CancellationToken,
) -> Result<bool> {
    tracing::warn!("[Auth] SMS verification required but no code provided");
    tracing::warn!("[Auth] Please enter the SMS verification code manually in the browser");

    let left = UrlCondition::NotContains(site.sms_verify_path().to_string());
    tokio::select! {
        _ = cancel.cancelled() => Ok(false),
        waited = page.wait_for_url(&left, timings.sms_manual_timeout) => match waited {
            Ok(()) => {
                tracing::info!("[Auth] SMS verification completed");
                Ok(true)
            }
            Err(e) if e.is_timeout() => {
                tracing::error!("[Auth] SMS verification timeout, code may not have been entered");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        },
    }
}
