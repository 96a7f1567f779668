//! Target dates and the date text the site renders
//!
//! Everything here compares calendar days, never instants, so a date typed
//! on the command line can't drift across a timezone boundary.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReserveError, Result};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// `YYYY-MM-DD` shape check: digit groups of 4, 2 and 2. Says nothing about
/// whether the date exists.
pub fn is_valid_date_format(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// The day we want parking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDate(NaiveDate);

impl TargetDate {
    /// Parse `YYYY-MM-DD`, rejecting both bad shapes and impossible dates
    pub fn parse(s: &str) -> Result<Self> {
        if !is_valid_date_format(s) {
            return Err(ReserveError::InvalidDate(s.to_string()));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(TargetDate)
            .map_err(|_| ReserveError::InvalidDate(s.to_string()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// How the calendar labels this day, e.g. `Monday, February 17, 2025`
    pub fn aria_label(&self) -> String {
        self.0.format("%A, %B %-d, %Y").to_string()
    }

    pub fn is_same_day(&self, other: NaiveDate) -> bool {
        self.0 == other
    }
}

impl From<NaiveDate> for TargetDate {
    fn from(date: NaiveDate) -> Self {
        TargetDate(date)
    }
}

impl FromStr for TargetDate {
    type Err = ReserveError;

    fn from_str(s: &str) -> Result<Self> {
        TargetDate::parse(s)
    }
}

impl fmt::Display for TargetDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Lenient `MMM D, YYYY` parse of text like `Feb 17, 2025`.
///
/// Takes the first month name (abbreviated or full), the next number as the
/// day and the one after as the year. Two-digit years are 20xx; a missing
/// year falls back to `default_year`. Surrounding words are ignored.
pub fn parse_loose_date(text: &str, default_year: i32) -> Option<NaiveDate> {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let (month_pos, month) = tokens
        .iter()
        .enumerate()
        .find_map(|(i, token)| month_from_name(token).map(|m| (i, m)))?;

    let mut numbers = tokens[month_pos + 1..].iter().filter_map(|t| leading_number(t));

    let day = numbers.next()?;
    let year = match numbers.next() {
        Some(y) if y < 100 => 2000 + y as i32,
        Some(y) => y as i32,
        None => default_year,
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Does any reservation text on the page name the target day?
pub fn is_already_reserved<S: AsRef<str>>(texts: &[S], target: &TargetDate) -> bool {
    let default_year = target.date().year();
    texts.iter().any(|text| {
        parse_loose_date(text.as_ref(), default_year).is_some_and(|d| target.is_same_day(d))
    })
}

fn month_from_name(token: &str) -> Option<u32> {
    if token.len() < 3 || !token.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let lower = token.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|name| name.starts_with(&lower))
        .map(|i| i as u32 + 1)
}

/// `17` from `17`, `17th`; none for words
fn leading_number(token: &str) -> Option<u32> {
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
