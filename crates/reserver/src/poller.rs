//! Availability poller
//!
//! Reloads the calendar until the target day shows the "available" colour,
//! then hands the page to the [`ReservationCommitter`]. The loop is
//! unbounded; only availability, cancellation or a dropped future end it.
//!
//! The current [`PollState`] is published on a watch channel so whoever
//! drives the poll can tell whether a commit is in flight.

use browser::PageDriver;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::committer::ReservationCommitter;
use crate::config::Timings;
use crate::date::TargetDate;
use crate::error::{ReserveError, Result};
use crate::site::SiteAdapter;

const BACKGROUND: &str = "background-color";
const UNPAINTED: &str = "rgba(0, 0, 0, 0)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Navigating,
    /// Getting from the parking codes page to the calendar
    ResolvingCodeUi,
    Inspecting,
    Waiting,
    Committing,
    Done,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Booked,
    /// Cancelled before anything was booked
    Aborted,
    AlreadyReserved,
    /// Open, but reservations are turned off
    Available,
}

/// What one look at the calendar found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable { background: String },
    Missing,
}

/// Exact match; the site renders the colour verbatim
pub fn is_available_color(sampled: &str, expected: &str) -> bool {
    sampled == expected
}

pub struct AvailabilityPoller {
    site: Arc<dyn SiteAdapter>,
    timings: Timings,
    make_reservation: bool,
    state: watch::Sender<PollState>,
}

impl AvailabilityPoller {
    pub fn new(site: Arc<dyn SiteAdapter>, timings: Timings, make_reservation: bool) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            site,
            timings,
            make_reservation,
            state,
        }
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PollState) {
        self.state.send_replace(state);
    }

    /// Poll until the date opens, then commit. Commit failures are returned
    /// as is, never retried.
    pub async fn poll(
        &self,
        page: &dyn PageDriver,
        target: &TargetDate,
        parking_code: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        tracing::info!(
            date = %target,
            cell = %self.site.calendar_cell(target),
            parking_code = parking_code.is_some(),
            "[Poller] Watching for availability"
        );

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;

            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.abort()),
                checked = self.check(page, target, parking_code) => checked,
            };

            match checked {
                Ok(Availability::Available) => {
                    tracing::info!(attempt, date = %target, "[Poller] Parking is available!");
                    return self.finish(page, target, parking_code).await;
                }
                Ok(Availability::Unavailable { background }) => {
                    tracing::info!(
                        attempt,
                        background = %background,
                        "[Poller] Date found but parking is not available"
                    );
                }
                Ok(Availability::Missing) => {
                    tracing::info!(attempt, "[Poller] Date not on the calendar yet");
                }
                Err(e) if e.is_detached() => {}
                Err(e) => tracing::warn!(attempt, error = %e, "[Poller] Navigation/check error"),
            }

            self.set_state(PollState::Waiting);
            tracing::debug!(interval = ?self.timings.poll_interval, "[Poller] Refreshing after delay");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.abort()),
                _ = tokio::time::sleep(self.timings.poll_interval) => {}
            }
        }
    }

    /// Load the calendar and look at the target day once
    pub async fn check(
        &self,
        page: &dyn PageDriver,
        target: &TargetDate,
        parking_code: Option<&str>,
    ) -> Result<Availability> {
        self.set_state(PollState::Navigating);
        match parking_code {
            Some(_) => {
                page.goto(&self.site.parking_codes_url()).await?;

                self.set_state(PollState::ResolvingCodeUi);
                let (buttons, label) = self.site.reserve_parking_button();
                if !page.click_with_text(buttons, label).await? {
                    return Err(ReserveError::ElementMissing(format!(
                        "button with text {:?}",
                        label
                    )));
                }
                tokio::time::sleep(self.timings.reserve_button_settle).await;
            }
            None => page.goto(&self.site.select_parking_url()).await?,
        }

        self.set_state(PollState::Inspecting);
        let cell = self.site.calendar_cell(target);
        self.wait_for_background(page, &cell).await?;

        Ok(match page.computed_style(&cell, BACKGROUND).await? {
            None => Availability::Missing,
            Some(background) if is_available_color(&background, self.site.available_background()) => {
                Availability::Available
            }
            Some(background) => Availability::Unavailable { background },
        })
    }

    /// Sample the cell's background until it shows the available colour or
    /// reads the same painted value twice in a row. Gives up quietly after
    /// `availability_timeout`; the caller samples whatever is there.
    async fn wait_for_background(&self, page: &dyn PageDriver, cell: &str) -> Result<()> {
        let deadline = Instant::now() + self.timings.availability_timeout;
        let mut previous: Option<String> = None;

        loop {
            let sample = match page.computed_style(cell, BACKGROUND).await {
                Ok(sample) => sample,
                // Calendar still loading
                Err(e) if e.is_context_lost() => None,
                Err(e) => return Err(e.into()),
            };

            // An existing cell reports transparent until the calendar paints it
            let painted = sample.filter(|v| !v.is_empty() && v.as_str() != UNPAINTED);
            if let Some(value) = &painted {
                if is_available_color(value, self.site.available_background())
                    || previous.as_ref() == Some(value)
                {
                    return Ok(());
                }
            }
            previous = painted;

            if Instant::now() >= deadline {
                tracing::debug!(cell, "[Poller] Cell colour did not settle");
                return Ok(());
            }
            tokio::time::sleep(self.timings.style_sample_interval).await;
        }
    }

    async fn finish(
        &self,
        page: &dyn PageDriver,
        target: &TargetDate,
        parking_code: Option<&str>,
    ) -> Result<Outcome> {
        if !self.make_reservation {
            tracing::info!("[Poller] Reservations disabled, not booking");
            self.set_state(PollState::Done);
            return Ok(Outcome::Available);
        }

        self.set_state(PollState::Committing);
        let committer = ReservationCommitter::new(self.site.clone(), self.timings.clone());
        let committed = committer.commit(page, target, parking_code).await;
        self.set_state(PollState::Done);

        Ok(if committed? {
            Outcome::Booked
        } else {
            Outcome::AlreadyReserved
        })
    }

    fn abort(&self) -> Outcome {
        tracing::info!("[Poller] Cancelled");
        self.set_state(PollState::Idle);
        Outcome::Aborted
    }
}
