//! Site adapter: every URL, selector and magic value of the booking site
//!
//! The flows only ever ask the adapter where to go and what to click. When
//! the site's markup changes, this is the file that changes.

use browser::Nth;
use url::Url;

use crate::date::TargetDate;

/// Which failed request counts as being rate limited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Substring of the request URL
    pub url_fragment: String,
    /// Exact `errorText` of the failure
    pub error_text: String,
}

impl RateLimitRule {
    pub fn matches(&self, url: &str, error_text: &str) -> bool {
        url.contains(&self.url_fragment) && error_text == self.error_text
    }
}

/// An element picked out of several matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    pub selector: &'a str,
    pub nth: Nth,
}

pub trait SiteAdapter: Send + Sync {
    // Login
    fn login_url(&self) -> String;
    /// Present in the URL while the login form is showing
    fn login_path(&self) -> &str;
    fn sms_verify_path(&self) -> &str;
    fn email_input(&self) -> &str;
    fn password_input(&self) -> &str;
    fn submit_button(&self) -> &str;
    fn sms_code_input(&self) -> &str;

    // Calendar
    fn select_parking_url(&self) -> String;
    fn parking_codes_url(&self) -> String;
    /// Buttons among which the "Reserve Parking" one is found, and its label
    fn reserve_parking_button(&self) -> (&str, &str);
    fn calendar_cell(&self, date: &TargetDate) -> String;
    /// Computed background colour of a bookable cell
    fn available_background(&self) -> &str;
    /// Text nodes listing dates already booked on the account
    fn reserved_dates(&self) -> &str;

    // Paid checkout
    fn rate_card(&self) -> &str;
    fn checkout_url_prefix(&self) -> &str;
    fn pay_button(&self) -> &str;
    fn confirm_button(&self) -> &str;

    // Code redemption
    fn redeem_arrow(&self) -> &str;
    fn terms_checkbox(&self) -> &str;
    fn redeem_button(&self) -> Target<'_>;
    fn confirmation_modal(&self) -> &str;
    fn modal_confirm_button(&self) -> Target<'_>;
    /// Present in the URL once a redemption went through
    fn purchased_marker(&self) -> &str;

    fn rate_limit_rule(&self) -> RateLimitRule;
}

/// Alta's parking reservations, served by HONK
#[derive(Debug, Clone)]
pub struct AltaParking {
    base_url: Url,
}

impl AltaParking {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn page(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

impl SiteAdapter for AltaParking {
    fn login_url(&self) -> String {
        self.page("/login")
    }

    fn login_path(&self) -> &str {
        "/login"
    }

    fn sms_verify_path(&self) -> &str {
        "/sms-verify"
    }

    fn email_input(&self) -> &str {
        "#emailAddress"
    }

    fn password_input(&self) -> &str {
        "#password"
    }

    fn submit_button(&self) -> &str {
        r#"button[type="submit"]"#
    }

    fn sms_code_input(&self) -> &str {
        r#"input[type="text"]"#
    }

    fn select_parking_url(&self) -> String {
        self.page("/select-parking")
    }

    fn parking_codes_url(&self) -> String {
        self.page("/parking-codes")
    }

    fn reserve_parking_button(&self) -> (&str, &str) {
        (r#"button[type="button"]"#, "Reserve Parking")
    }

    fn calendar_cell(&self, date: &TargetDate) -> String {
        format!("div[aria-label='{}']", date.aria_label())
    }

    fn available_background(&self) -> &str {
        "rgba(49, 200, 25, 0.2)"
    }

    fn reserved_dates(&self) -> &str {
        ".text-muted"
    }

    fn rate_card(&self) -> &str {
        r#"div[class^="SelectRate_card"]"#
    }

    fn checkout_url_prefix(&self) -> &str {
        "https://parking.honkmobile.com/checkout/"
    }

    fn pay_button(&self) -> &str {
        ".CtaButton--container__shadow"
    }

    fn confirm_button(&self) -> &str {
        ".ButtonComponent"
    }

    fn redeem_arrow(&self) -> &str {
        r#"[alt="arrow"]"#
    }

    fn terms_checkbox(&self) -> &str {
        "#terms"
    }

    // The redeem button has no stable hook; it is the last plain button
    fn redeem_button(&self) -> Target<'_> {
        Target {
            selector: r#"button[type="button"]"#,
            nth: Nth::Last,
        }
    }

    fn confirmation_modal(&self) -> &str {
        ".modals"
    }

    fn modal_confirm_button(&self) -> Target<'_> {
        Target {
            selector: ".modals button",
            nth: Nth::Index(1),
        }
    }

    fn purchased_marker(&self) -> &str {
        "?purchased"
    }

    fn rate_limit_rule(&self) -> RateLimitRule {
        RateLimitRule {
            url_fragment: "platform.honkmobile.com/graphql".to_string(),
            error_text: "net::ERR_FAILED".to_string(),
        }
    }
}
