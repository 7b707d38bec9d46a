//! Twilio SMS channel over the Messages REST API.

use super::{render, ChannelError, NotificationChannel};
use crate::diff::Delta;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio account settings.
#[derive(Debug, Clone)]
pub struct TwilioSettings {
    /// Account SID, also the basic-auth user.
    pub account_sid: String,
    /// Auth token.
    pub auth_token: String,
    /// Sending number in E.164 form.
    pub from_number: String,
}

/// Sends one text message per recipient.
pub struct SmsChannel {
    client: Client,
    endpoint: String,
    settings: TwilioSettings,
    recipients: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

impl SmsChannel {
    /// Builds the channel against the public Twilio API.
    pub fn new(settings: TwilioSettings, recipients: Vec<String>) -> Result<Self, ChannelError> {
        Self::with_api_base(TWILIO_API_BASE, settings, recipients)
    }

    /// Builds the channel against an alternate API root.
    pub fn with_api_base(
        api_base: &str,
        settings: TwilioSettings,
        recipients: Vec<String>,
    ) -> Result<Self, ChannelError> {
        if settings.account_sid.trim().is_empty() {
            return Err(ChannelError::Message("missing Twilio account SID".into()));
        }
        let recipients: Vec<String> = recipients
            .into_iter()
            .map(|number| number.trim().to_string())
            .filter(|number| !number.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(ChannelError::Message("no sms recipients".into()));
        }
        if let Some(bad) = recipients.iter().find(|number| !is_e164(number)) {
            return Err(ChannelError::InvalidRecipient {
                recipient: bad.clone(),
                reason: "expected E.164 format such as +15551234567".into(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ChannelError::Delivery(err.to_string()))?;
        let endpoint = format!(
            "{}/Accounts/{}/Messages.json",
            api_base.trim_end_matches('/'),
            settings.account_sid.trim()
        );
        Ok(Self {
            client,
            endpoint,
            settings,
            recipients,
        })
    }

    fn send_one(&self, to: &str, body: &str) -> Result<String, ChannelError> {
        let params = [
            ("To", to),
            ("From", self.settings.from_number.as_str()),
            ("Body", body),
        ];
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.settings.account_sid, Some(&self.settings.auth_token))
            .form(&params)
            .send()
            .map_err(|err| ChannelError::Delivery(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ChannelError::Delivery(format!("twilio returned {status}: {body}")));
        }
        let parsed: MessageResponse = response
            .json()
            .map_err(|err| ChannelError::Delivery(err.to_string()))?;
        Ok(parsed.sid)
    }
}

impl NotificationChannel for SmsChannel {
    fn name(&self) -> &str {
        "sms"
    }

    fn notify(&self, delta: &Delta) -> Result<usize, ChannelError> {
        if delta.is_empty() {
            return Ok(0);
        }
        let body = render::sms_body(delta);
        let mut sent = 0usize;
        let mut failed = 0usize;
        for number in &self.recipients {
            match self.send_one(number, &body) {
                Ok(sid) => {
                    info!(to = %number, %sid, "sms alert sent");
                    sent += 1;
                }
                Err(err) => {
                    error!(to = %number, error = %err, "sms alert failed");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(ChannelError::Partial { sent, failed });
        }
        Ok(sent)
    }
}

fn is_e164(number: &str) -> bool {
    let Some(digits) = number.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}
