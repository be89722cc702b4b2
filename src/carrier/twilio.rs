//! Twilio Messages API handler.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CarrierError, CarrierHandler, OutboundMms, OutboundSms};

const DEFAULT_API_BASE: &str = "https://api.twilio.com";

/// Error body Twilio returns on non-2xx responses.
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

pub struct TwilioHandler {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    api_base: String,
}

impl TwilioHandler {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CarrierError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point the handler at a different API host.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    async fn post_message(&self, form: &[(&str, &str)]) -> Result<(), CarrierError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "twilio accepted message");
            return Ok(());
        }

        let body: TwilioErrorBody = response.json().await.unwrap_or(TwilioErrorBody {
            code: None,
            message: None,
        });
        warn!(
            status = status.as_u16(),
            code = ?body.code,
            "twilio rejected message"
        );
        Err(CarrierError::Rejected {
            status: status.as_u16(),
            message: body
                .message
                .unwrap_or_else(|| "no error body".to_string()),
        })
    }
}

#[async_trait]
impl CarrierHandler for TwilioHandler {
    async fn send_sms(&self, sms: &OutboundSms) -> Result<(), CarrierError> {
        self.post_message(&[
            ("To", sms.to.as_str()),
            ("From", sms.from.as_str()),
            ("Body", sms.body.as_str()),
        ])
        .await
    }

    async fn send_mms(&self, mms: &OutboundMms) -> Result<(), CarrierError> {
        // Twilio takes MMS media by URL; raw parts ride along as the text
        // body plus any media URLs the envelope carries in its headers.
        let body = mms.envelope.text();
        let media_url = mms.envelope.header("X-Media-Url");

        if body.is_empty() && media_url.is_none() {
            return Err(CarrierError::Unsendable(
                "envelope has no text parts and no media url".to_string(),
            ));
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("To", mms.to.as_str()),
            ("From", mms.from.as_str()),
            ("Body", body.as_str()),
        ];
        if let Some(url) = media_url {
            form.push(("MediaUrl", url));
        }

        self.post_message(&form).await
    }
}
