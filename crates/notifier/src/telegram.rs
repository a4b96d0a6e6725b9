//! Telegram bot delivery (`sendMessage`).

use async_trait::async_trait;
use serde_json::json;

use newswire_common::text::truncate_chars;
use newswire_common::types::Channel;

use crate::sender::{ChannelSender, SendError, check_response};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_CHARS: usize = 4096;

pub struct TelegramSender {
    client: reqwest::Client,
    bot_token: Option<String>,
    api_base: String,
}

impl TelegramSender {
    pub fn new(client: reqwest::Client, bot_token: Option<String>) -> Self {
        Self {
            client,
            bot_token,
            api_base: TELEGRAM_API.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

fn message_payload(chat_id: &str, body: &str) -> serde_json::Value {
    json!({
        "chat_id": chat_id,
        "text": truncate_chars(body, MAX_MESSAGE_CHARS),
        "disable_web_page_preview": true,
    })
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(&self, chat_id: &str, _subject: Option<&str>, body: &str) -> Result<(), SendError> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or(SendError::NotConfigured("TELEGRAM_BOT_TOKEN"))?;

        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let payload = message_payload(chat_id, body);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            // reqwest errors embed the URL, which carries the bot token.
            .map_err(|e| SendError::from_reqwest("telegram", e.without_url()))?;

        check_response("telegram", response).await
    }
}
