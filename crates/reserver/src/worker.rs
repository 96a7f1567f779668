//! Run orchestration: one browser, one login, one poll, one booking
//!
//! The sentinel's recovery hook only wakes this loop. Recovery itself
//! (drop the in-flight poll, log in again, poll again) happens here, so
//! it never races the poller for the page and never cuts into a commit.

use browser::{BrowserSession, EventBus, PageDriver, PageOptions};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{self, Credentials};
use crate::config::{Settings, Timings};
use crate::date::TargetDate;
use crate::error::{ReserveError, Result};
use crate::notify::TwilioNotifier;
use crate::poller::{AvailabilityPoller, Outcome, PollState};
use crate::sentinel::RateLimitSentinel;
use crate::site::{AltaParking, SiteAdapter};

/// Everything the caller asks of one run
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub target: TargetDate,
    pub credentials: Credentials,
    pub sms_code: Option<String>,
    pub parking_code: Option<String>,
}

/// Run the whole flow against a fresh browser session
pub async fn process_reservation(
    settings: &Settings,
    request: &ReservationRequest,
    cancel: CancellationToken,
) -> Result<Outcome> {
    tracing::info!(
        date = %request.target,
        make_reservation = settings.make_reservation,
        "Processing reservation"
    );

    let site: Arc<dyn SiteAdapter> = Arc::new(AltaParking::new(settings.resort_base_url.clone()));

    let recover = Arc::new(Notify::new());
    let wake = recover.clone();
    let sentinel = RateLimitSentinel::new(
        site.rate_limit_rule(),
        Arc::new(move || wake.notify_one()),
    );

    let session = BrowserSession::new(settings.session_config()).with_page_options(PageOptions {
        viewport: settings.browser.window,
        navigation_timeout: settings.timings.navigation_timeout,
        ..PageOptions::default()
    });
    session.add_watchdog(Box::new(sentinel.clone())).await;
    let event_log = log_events(&session.event_bus);

    let poller = AvailabilityPoller::new(site.clone(), settings.timings.clone(), settings.make_reservation);

    let result: Result<Outcome> = async {
        session.start().await?;
        let page = session.open_page().await?;
        drive(&page, site.as_ref(), &poller, &recover, request, &settings.timings, &cancel).await
    }
    .await;

    sentinel.cleanup();
    if let Err(e) = session.stop().await {
        tracing::warn!(error = %e, "Failed to stop browser session");
    }
    event_log.abort();

    if sentinel.rate_limited() {
        tracing::info!(failures = sentinel.failures_seen(), "Rate limiting was seen during this run");
    }

    if let Some(message) = outcome_message(&request.target, &result) {
        notify(settings, &message).await;
    }

    result
}

/// Log in and poll; on the first rate-limit signal outside a commit, start
/// both over once
pub(crate) async fn drive(
    page: &dyn PageDriver,
    site: &dyn SiteAdapter,
    poller: &AvailabilityPoller,
    recover: &Notify,
    request: &ReservationRequest,
    timings: &Timings,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let mut recovered = false;

    loop {
        // A failed login is not fatal; polling shows whether it mattered
        if let Err(e) = auth::login(
            page,
            site,
            &request.credentials,
            request.sms_code.as_deref(),
            timings,
            cancel,
        )
        .await
        {
            tracing::error!(error = %e, "Error logging in");
        }

        let poll = poller.poll(
            page,
            &request.target,
            request.parking_code.as_deref(),
            cancel,
        );
        tokio::pin!(poll);

        loop {
            tokio::select! {
                outcome = &mut poll => return outcome,
                _ = recover.notified(), if !recovered => {
                    recovered = true;
                    if poller.state() == PollState::Committing {
                        tracing::warn!("Rate limited during checkout, letting the commit finish");
                        continue;
                    }
                    tracing::warn!("Rate limited, logging in again and restarting the poll");
                    break;
                }
            }
        }
    }
}

fn outcome_message(target: &TargetDate, result: &Result<Outcome>) -> Option<String> {
    match result {
        Ok(Outcome::Booked) => Some(format!("Parking reserved for {}", target)),
        Err(e @ ReserveError::Commit { .. }) => {
            Some(format!("Parking reservation for {} failed: {}", target, e))
        }
        _ => None,
    }
}

async fn notify(settings: &Settings, message: &str) {
    let Some(notifier) = TwilioNotifier::from_settings(&settings.twilio) else {
        tracing::debug!("[Notify] Twilio not configured, skipping text");
        return;
    };
    if let Err(e) = notifier.send_text(message, None).await {
        tracing::error!(error = %e, "[Notify] Failed to send text message");
    }
}

fn log_events(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            tracing::debug!(?event, "Browser event");
        }
    })
}
