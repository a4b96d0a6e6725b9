//! Discord webhook delivery. The alert target is the webhook URL itself.

use async_trait::async_trait;
use serde_json::json;

use newswire_common::text::truncate_chars;
use newswire_common::types::Channel;

use crate::sender::{ChannelSender, SendError, check_response};

/// Discord rejects webhook content longer than this.
const MAX_CONTENT_CHARS: usize = 2000;

pub struct DiscordWebhookSender {
    client: reqwest::Client,
}

impl DiscordWebhookSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn content_payload(body: &str) -> serde_json::Value {
    json!({ "content": truncate_chars(body, MAX_CONTENT_CHARS) })
}

#[async_trait]
impl ChannelSender for DiscordWebhookSender {
    fn channel(&self) -> Channel {
        Channel::Discord
    }

    async fn send(&self, webhook_url: &str, _subject: Option<&str>, body: &str) -> Result<(), SendError> {
        let response = self
            .client
            .post(webhook_url)
            .json(&content_payload(body))
            .send()
            .await
            .map_err(|e| SendError::from_reqwest("discord", e.without_url()))?;

        check_response("discord", response).await
    }
}
