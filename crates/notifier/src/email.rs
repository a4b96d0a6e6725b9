//! Email delivery through the Resend HTTP API.

use async_trait::async_trait;
use serde_json::json;

use newswire_common::types::Channel;

use crate::sender::{ChannelSender, SendError, check_response};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Subject used when the caller has none.
const DEFAULT_SUBJECT: &str = "Notification";

pub struct ResendEmailSender {
    client: reqwest::Client,
    api_key: Option<String>,
    from: String,
    endpoint: String,
}

impl ResendEmailSender {
    pub fn new(client: reqwest::Client, api_key: Option<String>, from: String) -> Self {
        Self {
            client,
            api_key,
            from,
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }

    /// Point the sender at another Resend-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl ChannelSender for ResendEmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, target: &str, subject: Option<&str>, body: &str) -> Result<(), SendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SendError::NotConfigured("RESEND_API_KEY"))?;

        let payload = json!({
            "from": self.from,
            "to": [target],
            "subject": subject.unwrap_or(DEFAULT_SUBJECT),
            "text": body,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendError::from_reqwest("resend", e))?;

        check_response("resend", response).await
    }
}
