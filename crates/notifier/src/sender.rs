//! Channel sender contract and registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use newswire_common::config::ProviderConfig;
use newswire_common::text::truncate_chars;
use newswire_common::types::Channel;

use crate::discord::DiscordWebhookSender;
use crate::email::ResendEmailSender;
use crate::telegram::TelegramSender;

/// Per-request timeout for user-facing providers.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Longest provider response body kept in a diagnostic.
const ERROR_BODY_CHARS: usize = 200;

/// Why a send did not go through. Rendered as `<class>: <detail>` so the
/// stored error string can be classified again later.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("{provider}_status_{status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("not_configured: {0}")]
    NotConfigured(&'static str),

    #[error("unsupported_channel: {0}")]
    UnsupportedChannel(String),
}

impl SendError {
    pub fn status(provider: &'static str, status: u16, body: &str) -> Self {
        SendError::Status {
            provider,
            status,
            body: truncate_chars(body.trim(), ERROR_BODY_CHARS).to_string(),
        }
    }

    pub fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        let detail = format!("{}: {}", provider, err);
        if err.is_timeout() {
            SendError::Timeout(detail)
        } else {
            SendError::Transport(detail)
        }
    }
}

/// Anything that can deliver a message to a channel-specific target.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver `body` to `target`. Channels without subjects ignore `subject`.
    async fn send(&self, target: &str, subject: Option<&str>, body: &str) -> Result<(), SendError>;
}

/// Check a provider response, turning non-2xx into a [`SendError`].
pub(crate) async fn check_response(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<(), SendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SendError::status(provider, status.as_u16(), &body))
}

/// Senders keyed by channel.
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the production senders from provider credentials.
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;

        Ok(Self::new()
            .with(Arc::new(ResendEmailSender::new(
                client.clone(),
                config.resend_api_key.clone(),
                config.email_from.clone(),
            )))
            .with(Arc::new(TelegramSender::new(
                client.clone(),
                config.telegram_bot_token.clone(),
            )))
            .with(Arc::new(DiscordWebhookSender::new(client))))
    }

    /// Register (or replace) the sender for its channel.
    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }

    /// Send through the registered sender, failing cleanly when none exists.
    pub async fn send(
        &self,
        channel: Channel,
        target: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<(), SendError> {
        match self.get(channel) {
            Some(sender) => sender.send(target, subject, body).await,
            None => Err(SendError::UnsupportedChannel(channel.to_string())),
        }
    }
}
