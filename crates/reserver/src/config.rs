//! Runtime settings, read once from the environment at startup
//!
//! The binary loads `.env` first (dotenvy), so everything here can live in
//! that file. Unset variables take the defaults below; set-but-malformed ones
//! are an error rather than silently ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use browser::{LaunchOptions, SessionConfig, Viewport};
use url::Url;

use crate::error::{ReserveError, Result};

pub const DEFAULT_RESORT_BASE_URL: &str = "https://reserve.altaparking.com";
pub const DEFAULT_TWILIO_CONTENT_SID: &str = "HXb5b62575e6e4ff6129ad7c8efe1f983e";

/// Fixed waits and timeouts of the flow
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    /// Delay between availability checks
    pub poll_interval: Duration,
    /// How long to wait for the date cell's colour to settle
    pub availability_timeout: Duration,
    /// Gap between colour samples while it settles
    pub style_sample_interval: Duration,
    /// Default wait for a button, card or checkbox
    pub element_timeout: Duration,
    /// Wait for the calendar after pressing "Reserve Parking"
    pub reserve_button_settle: Duration,
    /// Pause before pressing pay, the button ignores early clicks
    pub pay_settle: Duration,
    pub navigation_timeout: Duration,
    pub sms_input_timeout: Duration,
    pub sms_submit_timeout: Duration,
    /// How long a human gets to type the SMS code into the browser
    pub sms_manual_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            availability_timeout: Duration::from_secs(5),
            style_sample_interval: Duration::from_millis(500),
            element_timeout: Duration::from_secs(10),
            reserve_button_settle: Duration::from_secs(2),
            pay_settle: Duration::from_millis(1500),
            navigation_timeout: Duration::from_secs(30),
            sms_input_timeout: Duration::from_secs(300),
            sms_submit_timeout: Duration::from_secs(10),
            sms_manual_timeout: Duration::from_secs(300),
        }
    }
}

/// Default login, used when the command line leaves it out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSettings {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwilioSettings {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub content_sid: String,
}

impl Default for TwilioSettings {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            from_number: None,
            to_number: None,
            content_sid: DEFAULT_TWILIO_CONTENT_SID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSettings {
    pub chrome_path: Option<PathBuf>,
    pub debug_port: u16,
    /// Attach to this browser instead of launching one
    pub cdp_url: Option<String>,
    pub window: Viewport,
    pub headless: bool,
    pub open_devtools: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            debug_port: 9222,
            cdp_url: None,
            window: Viewport::default(),
            headless: false,
            open_devtools: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub resort_base_url: Url,
    pub auth: AuthSettings,
    pub twilio: TwilioSettings,
    pub browser: BrowserSettings,
    /// When false, stop at the first sign of availability without booking
    pub make_reservation: bool,
    pub timings: Timings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resort_base_url: Url::parse(DEFAULT_RESORT_BASE_URL).expect("default base URL is valid"),
            auth: AuthSettings::default(),
            twilio: TwilioSettings::default(),
            browser: BrowserSettings::default(),
            make_reservation: true,
            timings: Timings::default(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        let resort_base_url = match get("RESORT_BASE_URL") {
            Some(raw) => Url::parse(&raw)
                .map_err(|e| ReserveError::Config(format!("RESORT_BASE_URL {:?}: {}", raw, e)))?,
            None => defaults.resort_base_url,
        };

        let mut timings = defaults.timings;
        if let Some(secs) = parse_var::<u64>(&get, "POLL_INTERVAL_SECS")? {
            // Zero would reload the calendar back to back and trip the rate limit
            if secs == 0 {
                return Err(ReserveError::Config(
                    "POLL_INTERVAL_SECS must be at least 1".to_string(),
                ));
            }
            timings.poll_interval = Duration::from_secs(secs);
        }

        Ok(Self {
            resort_base_url,
            auth: AuthSettings {
                email: get("EMAIL"),
                password: get("PASSWORD"),
            },
            twilio: TwilioSettings {
                account_sid: get("TWILIO_ACCOUNT_SID"),
                auth_token: get("TWILIO_AUTH_TOKEN"),
                from_number: get("TWILIO_FROM_NUMBER"),
                to_number: get("TWILIO_TO_NUMBER"),
                content_sid: get("TWILIO_CONTENT_SID").unwrap_or(defaults.twilio.content_sid),
            },
            browser: BrowserSettings {
                chrome_path: get("CHROME_PATH").map(PathBuf::from),
                debug_port: parse_var(&get, "CHROME_DEBUG_PORT")?
                    .unwrap_or(defaults.browser.debug_port),
                cdp_url: get("CDP_URL"),
                window: Viewport {
                    width: parse_var(&get, "WINDOW_WIDTH")?
                        .unwrap_or(defaults.browser.window.width),
                    height: parse_var(&get, "WINDOW_HEIGHT")?
                        .unwrap_or(defaults.browser.window.height),
                },
                headless: parse_flag(&get, "HEADLESS")?.unwrap_or(defaults.browser.headless),
                open_devtools: parse_flag(&get, "OPEN_DEVTOOLS")?
                    .unwrap_or(defaults.browser.open_devtools),
            },
            make_reservation: parse_flag(&get, "MAKE_RESERVATION")?
                .unwrap_or(defaults.make_reservation),
            timings,
        })
    }

    /// Browser session config for a run
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            cdp_url: self.browser.cdp_url.clone(),
            launch: LaunchOptions {
                executable: self.browser.chrome_path.clone(),
                port: self.browser.debug_port,
                window: self.browser.window,
                headless: self.browser.headless,
                devtools: self.browser.open_devtools,
                ..LaunchOptions::default()
            },
            ..SessionConfig::default()
        }
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ReserveError::Config(format!("{} {:?}: {}", key, raw, e)))
        })
        .transpose()
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    get(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ReserveError::Config(format!("{} {:?}: expected a boolean", key, raw))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.resort_base_url.as_str(), "https://reserve.altaparking.com/");
        assert_eq!(settings.browser.window, Viewport { width: 1000, height: 1000 });
        assert_eq!(settings.timings.poll_interval, Duration::from_secs(10));
        assert!(settings.make_reservation);
        assert_eq!(settings.twilio.content_sid, DEFAULT_TWILIO_CONTENT_SID);
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("EMAIL", "skier@example.com"),
            ("PASSWORD", "hunter2"),
            ("WINDOW_WIDTH", "1280"),
            ("WINDOW_HEIGHT", " 720 "),
            ("CHROME_DEBUG_PORT", "9333"),
            ("MAKE_RESERVATION", "false"),
            ("HEADLESS", "yes"),
            ("POLL_INTERVAL_SECS", "30"),
            ("RESORT_BASE_URL", "https://reserve.example-resort.com"),
        ])
        .unwrap();

        assert_eq!(settings.auth.email.as_deref(), Some("skier@example.com"));
        assert_eq!(settings.auth.password.as_deref(), Some("hunter2"));
        assert_eq!(settings.browser.window, Viewport { width: 1280, height: 720 });
        assert_eq!(settings.browser.debug_port, 9333);
        assert!(settings.browser.headless);
        assert!(!settings.make_reservation);
        assert_eq!(settings.timings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.resort_base_url.host_str(), Some("reserve.example-resort.com"));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let settings = settings(&[("EMAIL", ""), ("WINDOW_WIDTH", "  ")]).unwrap();
        assert_eq!(settings.auth.email, None);
        assert_eq!(settings.browser.window.width, 1000);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(matches!(settings(&[("WINDOW_WIDTH", "wide")]), Err(ReserveError::Config(_))));
        assert!(matches!(settings(&[("OPEN_DEVTOOLS", "maybe")]), Err(ReserveError::Config(_))));
        assert!(matches!(settings(&[("RESORT_BASE_URL", "not a url")]), Err(ReserveError::Config(_))));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        assert!(matches!(settings(&[("POLL_INTERVAL_SECS", "0")]), Err(ReserveError::Config(_))));
        assert_eq!(
            settings(&[("POLL_INTERVAL_SECS", "1")]).unwrap().timings.poll_interval,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_session_config() {
        let settings = settings(&[("CHROME_PATH", "/usr/bin/chromium"), ("OPEN_DEVTOOLS", "1")]).unwrap();
        let config = settings.session_config();
        assert_eq!(config.launch.executable, Some(PathBuf::from("/usr/bin/chromium")));
        assert!(config.launch.devtools);
        assert!(config.launch.incognito);
        assert_eq!(config.cdp_url, None);
    }
}
