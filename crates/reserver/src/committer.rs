//! Reservation committer: the purchase click sequence once a date is open
//!
//! Two flows, picked by whether a parking code is in play. Every step has
//! a bounded wait, and a failure at any step is fatal for the attempt; the
//! error names the step.

use browser::{BrowserError, Nth, PageDriver, UrlCondition};
use std::sync::Arc;

use crate::config::Timings;
use crate::date::{is_already_reserved, TargetDate};
use crate::error::{ReserveError, Result};
use crate::site::SiteAdapter;

pub struct ReservationCommitter {
    site: Arc<dyn SiteAdapter>,
    timings: Timings,
}

impl ReservationCommitter {
    pub fn new(site: Arc<dyn SiteAdapter>, timings: Timings) -> Self {
        Self { site, timings }
    }

    /// Book `target` from the calendar page. Returns false when the account
    /// already holds a reservation for that day.
    pub async fn commit(
        &self,
        page: &dyn PageDriver,
        target: &TargetDate,
        parking_code: Option<&str>,
    ) -> Result<bool> {
        let reserved = page
            .text_contents(self.site.reserved_dates())
            .await
            .map_err(at("reservation pre-check"))?;
        if is_already_reserved(&reserved, target) {
            tracing::info!(date = %target, "[Committer] Date already reserved");
            return Ok(false);
        }

        page.click(&self.site.calendar_cell(target), Nth::First)
            .await
            .map_err(at("calendar cell"))?;

        match parking_code {
            Some(_) => {
                tracing::info!(date = %target, "[Committer] Redeeming parking code");
                self.redeem(page).await?;
            }
            None => {
                tracing::info!(date = %target, "[Committer] Paying for parking");
                self.pay(page).await?;
            }
        }

        tracing::info!(date = %target, "[Committer] Reservation complete");
        Ok(true)
    }

    async fn pay(&self, page: &dyn PageDriver) -> Result<()> {
        let site = self.site.as_ref();
        let wait = self.timings.element_timeout;

        page.wait_for_selector(site.rate_card(), wait)
            .await
            .map_err(at("rate card"))?;
        page.click(site.rate_card(), Nth::First)
            .await
            .map_err(at("rate card"))?;

        page.wait_for_url(
            &UrlCondition::StartsWith(site.checkout_url_prefix().to_string()),
            wait,
        )
        .await
        .map_err(at("checkout page"))?;

        page.wait_for_selector(site.pay_button(), wait)
            .await
            .map_err(at("pay button"))?;
        tokio::time::sleep(self.timings.pay_settle).await;
        page.click(site.pay_button(), Nth::First)
            .await
            .map_err(at("pay button"))?;

        page.wait_for_selector(site.confirm_button(), wait)
            .await
            .map_err(at("confirm button"))?;
        page.click(site.confirm_button(), Nth::First)
            .await
            .map_err(at("confirm button"))?;

        Ok(())
    }

    async fn redeem(&self, page: &dyn PageDriver) -> Result<()> {
        let site = self.site.as_ref();
        let wait = self.timings.element_timeout;

        page.wait_for_selector(site.redeem_arrow(), wait)
            .await
            .map_err(at("parking code arrow"))?;
        page.click(site.redeem_arrow(), Nth::First)
            .await
            .map_err(at("parking code arrow"))?;

        page.wait_for_selector(site.terms_checkbox(), wait)
            .await
            .map_err(at("terms checkbox"))?;
        if !page
            .is_checked(site.terms_checkbox())
            .await
            .map_err(at("terms checkbox"))?
        {
            page.click(site.terms_checkbox(), Nth::First)
                .await
                .map_err(at("terms checkbox"))?;
        }

        let redeem = site.redeem_button();
        page.click(redeem.selector, redeem.nth)
            .await
            .map_err(at("redeem button"))?;

        page.wait_for_selector(site.confirmation_modal(), wait)
            .await
            .map_err(at("confirmation modal"))?;
        let confirm = site.modal_confirm_button();
        page.click(confirm.selector, confirm.nth)
            .await
            .map_err(at("confirmation modal"))?;

        page.wait_for_url(
            &UrlCondition::Contains(site.purchased_marker().to_string()),
            wait,
        )
        .await
        .map_err(at("purchase confirmation"))?;

        Ok(())
    }
}

fn at(step: &'static str) -> impl Fn(BrowserError) -> ReserveError {
    move |e| ReserveError::commit(step, e)
}
