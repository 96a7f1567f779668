//! Parking reserver
//!
//! Watches a resort's parking calendar through a real Chrome and books the
//! target date as soon as it opens, either paying or redeeming a parking
//! code.
//!
//! # Flow
//!
//! 1. **auth**: log in, getting past SMS verification if asked
//! 2. **poller**: reload the calendar until the date is available
//! 3. **committer**: click through checkout or code redemption
//!
//! The **sentinel** watches the network for rate limiting and has the
//! **worker** start login and polling over once when it sees it.

pub mod auth;
pub mod cli;
pub mod committer;
pub mod config;
pub mod date;
pub mod error;
pub mod notify;
pub mod poller;
pub mod sentinel;
pub mod site;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::Credentials;
pub use config::Settings;
pub use date::TargetDate;
pub use error::{ReserveError, Result};
pub use poller::{Availability, AvailabilityPoller, Outcome, PollState};
pub use sentinel::RateLimitSentinel;
pub use site::{AltaParking, SiteAdapter};
pub use worker::{process_reservation, ReservationRequest};
