//! Command line

use clap::{Args, Parser, Subcommand};

use crate::auth::Credentials;
use crate::config::Settings;
use crate::date::{is_valid_date_format, TargetDate};
use crate::error::{ReserveError, Result};
use crate::worker::ReservationRequest;

#[derive(Debug, Parser)]
#[command(name = "parking-reserver")]
#[command(version, about = "Watch a resort parking calendar and book a date the moment it opens")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll for the date and reserve it
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Date to reserve, YYYY-MM-DD
    pub date: Option<String>,

    /// Account email [env: EMAIL]
    pub email: Option<String>,

    /// Account password [env: PASSWORD]
    pub password: Option<String>,

    /// Redeem this parking code instead of paying
    pub parking_code: Option<String>,

    /// SMS verification code, if the site asks for one
    #[arg(long)]
    pub sms_code: Option<String>,

    /// Stop once the date is available, without booking
    #[arg(long)]
    pub check_only: bool,

    /// Open DevTools in the launched browser
    #[arg(long)]
    pub devtools: bool,

    /// Run the browser headless
    #[arg(long)]
    pub headless: bool,
}

impl RunArgs {
    /// Flags override the environment
    pub fn apply(&self, settings: &mut Settings) {
        if self.check_only {
            settings.make_reservation = false;
        }
        if self.devtools {
            settings.browser.open_devtools = true;
        }
        if self.headless {
            settings.browser.headless = true;
        }
    }

    /// Validate the arguments into a run. `None` when no date was given.
    pub fn request(&self, settings: &Settings) -> Result<Option<ReservationRequest>> {
        let Some(date) = self.date.as_deref() else {
            return Ok(None);
        };
        if !is_valid_date_format(date) {
            return Err(ReserveError::InvalidDate(date.to_string()));
        }
        let target = TargetDate::parse(date)?;

        let email = self.email.clone().or_else(|| settings.auth.email.clone());
        let password = self.password.clone().or_else(|| settings.auth.password.clone());
        let (Some(email), Some(password)) = (email, password) else {
            return Err(ReserveError::MissingCredentials);
        };

        Ok(Some(ReservationRequest {
            target,
            credentials: Credentials::new(email, password),
            sms_code: self.sms_code.clone(),
            parking_code: self.parking_code.clone().filter(|c| !c.trim().is_empty()),
        }))
    }
}
