//! Operator escalations for given-up deliveries and backlog growth.
//!
//! Every escalation goes through a cooldown gate keyed by what went wrong,
//! so a provider outage produces one message per cooldown rather than one
//! per delivery. Failures here are logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use newswire_common::config::{OperatorConfig, ProviderConfig};
use newswire_common::text::truncate_chars;
use newswire_common::types::Channel;

use crate::cooldown::CooldownStore;
use crate::email::ResendEmailSender;
use crate::sender::ChannelSender;
use crate::telegram::TelegramSender;

/// Operator sends use a shorter timeout than user-facing ones.
const OPERATOR_TIMEOUT: Duration = Duration::from_secs(10);

const ERROR_PREVIEW_CHARS: usize = 200;
const CHECK_HINT: &str = "check: journalctl -u newswire-dispatcher.service -n 200";

pub const GIVEUP_TAG: &str = "ALERTS_DELIVERY_GIVEUP";
pub const BACKLOG_TAG: &str = "ALERTS_BACKLOG_WARN";

/// Reduce a stored delivery error to a short class used in cooldown keys.
///
/// `resend_status_502: bad gateway` becomes `resend_status_502`; the legacy
/// `send_exception=Type:message` form becomes `Type`.
pub fn classify_error(error: &str) -> String {
    if error.trim().is_empty() {
        return "unknown".to_string();
    }
    if let Some((_, tail)) = error.split_once("send_exception=") {
        let class = tail.split(':').next().unwrap_or("").trim();
        return if class.is_empty() { "exception" } else { class }.to_string();
    }
    let class = error.split(':').next().unwrap_or("").trim();
    if class.is_empty() { "error" } else { class }.to_string()
}

/// A delivery that exhausted its attempts.
#[derive(Debug, Clone)]
pub struct GiveUp {
    pub alert_id: Uuid,
    pub user_id: Uuid,
    pub channel: String,
    pub target: String,
    pub attempts: i32,
    pub error: String,
}

impl GiveUp {
    pub fn cooldown_key(&self) -> String {
        let channel = self.channel.trim();
        let channel = if channel.is_empty() { "unknown" } else { channel };
        format!("giveup:{}:{}", channel, classify_error(&self.error))
    }

    pub fn message(&self) -> String {
        format!(
            "{}\nalert_id={}\nuser_id={}\nchannel={}\ntarget={}\nattempts={}\nerror={}\n{}",
            GIVEUP_TAG,
            self.alert_id,
            self.user_id,
            self.channel,
            self.target.trim(),
            self.attempts,
            truncate_chars(&self.error, ERROR_PREVIEW_CHARS),
            CHECK_HINT,
        )
    }
}

/// Backlog figures that crossed a warning threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklogWarning {
    pub pending: i64,
    pub pending_due: i64,
    pub oldest_age_sec: i64,
    pub next_due_in_sec: i64,
    pub queued_at_estimated: i64,
    pub warn_count: i64,
    pub warn_age_sec: i64,
}

impl BacklogWarning {
    pub const COOLDOWN_KEY: &'static str = "backlog:global";

    pub fn message(&self) -> String {
        format!(
            "{}\npending={}\npending_due={}\noldest_age_sec={}\nnext_due_in_sec={}\nqueued_at_estimated={}\nwarn_count={}\nwarn_age_sec={}\n{}",
            BACKLOG_TAG,
            self.pending,
            self.pending_due,
            self.oldest_age_sec,
            self.next_due_in_sec,
            self.queued_at_estimated,
            self.warn_count,
            self.warn_age_sec,
            CHECK_HINT,
        )
    }
}

/// An operator destination: one sender and the targets it fans out to.
#[derive(Clone)]
pub struct OperatorRoute {
    pub sender: Arc<dyn ChannelSender>,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// No operator route is configured.
    Disabled,
    /// The cooldown for this key has not elapsed.
    Suppressed,
    /// The cooldown store could not be consulted; nothing was sent.
    Unavailable,
    /// Routes were attempted; counts are per route.
    Notified { ok: usize, failed: usize },
}

pub struct Escalator {
    cooldowns: Arc<dyn CooldownStore>,
    routes: Vec<OperatorRoute>,
    subject_prefix: String,
    giveup_cooldown_sec: u64,
    backlog_cooldown_sec: u64,
}

impl Escalator {
    pub fn new(
        cooldowns: Arc<dyn CooldownStore>,
        giveup_cooldown_sec: u64,
        backlog_cooldown_sec: u64,
    ) -> Self {
        Self {
            cooldowns,
            routes: Vec::new(),
            subject_prefix: String::new(),
            giveup_cooldown_sec,
            backlog_cooldown_sec,
        }
    }

    /// Build the operator routes from configuration. Telegram needs both a
    /// bot token and a chat id; email reuses the Resend credentials.
    pub fn from_config(
        operator: &OperatorConfig,
        providers: &ProviderConfig,
        cooldowns: Arc<dyn CooldownStore>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(OPERATOR_TIMEOUT).build()?;
        let mut escalator = Self::new(
            cooldowns,
            operator.giveup_cooldown_sec,
            operator.backlog_cooldown_sec,
        )
        .with_subject_prefix(&operator.email_subject_prefix);

        if let (Some(token), Some(chat_id)) = (&operator.telegram_bot_token, &operator.telegram_chat_id) {
            escalator = escalator.with_route(OperatorRoute {
                sender: Arc::new(TelegramSender::new(client.clone(), Some(token.clone()))),
                targets: vec![chat_id.clone()],
            });
        }

        if !operator.emails.is_empty() {
            escalator = escalator.with_route(OperatorRoute {
                sender: Arc::new(ResendEmailSender::new(
                    client,
                    providers.resend_api_key.clone(),
                    providers.email_from.clone(),
                )),
                targets: operator.emails.clone(),
            });
        }

        Ok(escalator)
    }

    pub fn with_route(mut self, route: OperatorRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_subject_prefix(mut self, prefix: &str) -> Self {
        self.subject_prefix = prefix.trim().to_string();
        self
    }

    pub fn enabled(&self) -> bool {
        !self.routes.is_empty()
    }

    pub async fn notify_giveup(&self, giveup: &GiveUp) -> EscalationOutcome {
        self.escalate(
            &giveup.cooldown_key(),
            self.giveup_cooldown_sec,
            GIVEUP_TAG,
            &giveup.message(),
        )
        .await
    }

    pub async fn notify_backlog(&self, warning: &BacklogWarning) -> EscalationOutcome {
        self.escalate(
            BacklogWarning::COOLDOWN_KEY,
            self.backlog_cooldown_sec,
            BACKLOG_TAG,
            &warning.message(),
        )
        .await
    }

    /// Send `body` to every route if the cooldown for `key` admits it.
    pub async fn escalate(
        &self,
        key: &str,
        cooldown_secs: u64,
        tag: &str,
        body: &str,
    ) -> EscalationOutcome {
        if !self.enabled() {
            return EscalationOutcome::Disabled;
        }

        match self.cooldowns.try_acquire(key, cooldown_secs).await {
            Ok(true) => {}
            Ok(false) => return EscalationOutcome::Suppressed,
            Err(e) => {
                tracing::warn!(key, error = %e, "Escalation cooldown check failed");
                return EscalationOutcome::Unavailable;
            }
        }

        let subject = format!("{} {}", self.subject_prefix, tag).trim().to_string();
        let mut ok = 0;
        let mut failed = 0;

        for route in &self.routes {
            let channel: Channel = route.sender.channel();
            let mut errors = Vec::new();
            for target in &route.targets {
                if let Err(e) = route.sender.send(target, Some(&subject), body).await {
                    errors.push(e.to_string());
                }
            }

            if errors.is_empty() {
                ok += 1;
                tracing::info!(channel = %channel, key, ok = true, "Operator notification");
            } else {
                failed += 1;
                // Multi-target routes collapse to one marker; single ones keep the detail.
                let err = if route.targets.len() > 1 {
                    "send_failed".to_string()
                } else {
                    errors.join("; ")
                };
                tracing::warn!(channel = %channel, key, ok = false, err = %err, "Operator notification");
            }
        }

        EscalationOutcome::Notified { ok, failed }
    }
}
