//! Text message notifications through Twilio's REST API

use serde_json::json;

use crate::config::TwilioSettings;
use crate::error::Result;

const TWILIO_API: &str = "https://api.twilio.com";

/// Sends templated texts. Only exists when Twilio is fully configured.
#[derive(Debug, Clone)]
pub struct TwilioNotifier {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    to_number: String,
    content_sid: String,
}

impl TwilioNotifier {
    /// `None` unless account, token, sender and recipient are all set
    pub fn from_settings(settings: &TwilioSettings) -> Option<Self> {
        Some(Self {
            client: reqwest::Client::new(),
            api_base: TWILIO_API.to_string(),
            account_sid: settings.account_sid.clone()?,
            auth_token: settings.auth_token.clone()?,
            from_number: settings.from_number.clone()?,
            to_number: settings.to_number.clone()?,
            content_sid: settings.content_sid.clone(),
        })
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    /// Form body for one message; the template takes the text as variable 1
    pub fn message_form(&self, message: &str, to: Option<&str>) -> Vec<(&'static str, String)> {
        vec![
            ("From", self.from_number.clone()),
            ("To", to.unwrap_or(&self.to_number).to_string()),
            ("ContentSid", self.content_sid.clone()),
            ("ContentVariables", json!({ "1": message }).to_string()),
        ]
    }

    /// Send `message` to `to`, or the configured recipient
    pub async fn send_text(&self, message: &str, to: Option<&str>) -> Result<()> {
        self.client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&self.message_form(message, to))
            .send()
            .await?
            .error_for_status()?;

        tracing::info!(message, "[Notify] Text message sent");
        Ok(())
    }
}
