use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messaging channels an alert can deliver through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Telegram,
    Discord,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Telegram => "telegram",
            Channel::Discord => "discord",
        }
    }

    /// Batch-capable channels receive one composite message per batch of
    /// deliveries; the others receive one message per delivery.
    pub fn is_batch_capable(&self) -> bool {
        matches!(self, Channel::Email)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "telegram" => Ok(Channel::Telegram),
            "discord" => Ok(Channel::Discord),
            other => Err(format!("unsupported channel '{}'", other)),
        }
    }
}

/// Delivery lifecycle status. `Sent` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "PENDING"),
            DeliveryStatus::Sent => write!(f, "SENT"),
            DeliveryStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Routing priority assigned to a delivery when it is claimed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text")]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Priority::P0),
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A user's stored search predicate. Owned by the query API; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSearch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: Option<String>,
    /// Free-text query; empty means "match everything in the window".
    pub query: String,
    /// Lookback window used when the alert has no cursor yet.
    pub days: i32,
    pub category: Option<String>,
    pub source: Option<String>,
}

/// An active subscription binding a saved search to a channel and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Raw channel name as stored; parsed into [`Channel`] at dispatch time.
    pub channel: String,
    /// Email address, Telegram chat id or Discord webhook URL.
    pub target: String,
    pub saved_search_id: Uuid,
    pub active: bool,
}

/// Where a set of resolved preferences came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceSource {
    Stored,
    Default,
}

impl std::fmt::Display for PreferenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreferenceSource::Stored => write!(f, "db"),
            PreferenceSource::Default => write!(f, "default"),
        }
    }
}

/// Per-owner delivery preferences, resolved against defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: Uuid,
    pub dedupe_window_sec: i64,
    pub immediate_priorities: Vec<Priority>,
    pub digest_priorities: Vec<Priority>,
    /// Lowercased categories that lift an unqueried search to P1.
    pub priority_categories: Vec<String>,
    pub channels_enabled: Vec<String>,
    pub source: PreferenceSource,
}

impl UserPreferences {
    /// Defaults applied when the owner has no preferences row.
    pub fn defaults(
        user_id: Uuid,
        dedupe_window_sec: i64,
        priority_categories: Vec<String>,
    ) -> Self {
        Self {
            user_id,
            dedupe_window_sec,
            immediate_priorities: vec![Priority::P0],
            digest_priorities: vec![Priority::P1, Priority::P2],
            priority_categories,
            channels_enabled: vec![Channel::Email.to_string()],
            source: PreferenceSource::Default,
        }
    }

    /// Whether a delivery with this priority is routed anywhere.
    pub fn routes(&self, priority: Priority) -> bool {
        self.immediate_priorities.contains(&priority) || self.digest_priorities.contains(&priority)
    }

    pub fn channel_enabled(&self, channel: &str) -> bool {
        self.channels_enabled
            .iter()
            .any(|c| c.eq_ignore_ascii_case(channel.trim()))
    }
}

/// A catalog article as seen by the matcher and the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub category: Option<String>,
    pub source_name: Option<String>,
    /// Publication time, falling back to ingestion time.
    pub published_at: DateTime<Utc>,
}

/// One notification unit: (alert, article, channel) plus its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub user_id: Uuid,
    pub article_id: i64,
    pub channel: String,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    pub queued_at_is_estimated: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub dedupe_key: String,
    pub normalized_url: Option<String>,
    pub priority: Priority,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A dispatch-eligible delivery joined with its alert's target.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DueDelivery {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub user_id: Uuid,
    pub article_id: i64,
    pub channel: String,
    pub target: String,
    pub attempt_count: i32,
    pub dedupe_key: String,
    pub priority: Priority,
}

/// Per-alert resume watermark.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryCursor {
    pub alert_id: Uuid,
    pub last_ts: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse_and_display() {
        assert_eq!("Email".parse::<Channel>().unwrap(), Channel::Email);
        assert_eq!(" telegram ".parse::<Channel>().unwrap(), Channel::Telegram);
        assert!("sms".parse::<Channel>().is_err());
        assert_eq!(Channel::Discord.to_string(), "discord");
        assert!(Channel::Email.is_batch_capable());
        assert!(!Channel::Telegram.is_batch_capable());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("p1".parse::<Priority>().unwrap(), Priority::P1);
        assert!("P9".parse::<Priority>().is_err());
    }

    #[test]
    fn test_default_preferences() {
        let prefs = UserPreferences::defaults(Uuid::new_v4(), 21_600, vec![]);
        assert!(prefs.routes(Priority::P0));
        assert!(prefs.routes(Priority::P1));
        assert!(prefs.routes(Priority::P2));
        assert!(prefs.channel_enabled("email"));
        assert!(prefs.channel_enabled("EMAIL"));
        assert!(!prefs.channel_enabled("telegram"));
        assert_eq!(prefs.source, PreferenceSource::Default);
    }

    #[test]
    fn test_unrouted_priority() {
        let mut prefs = UserPreferences::defaults(Uuid::new_v4(), 21_600, vec![]);
        prefs.digest_priorities = vec![Priority::P1];
        assert!(!prefs.routes(Priority::P2));
    }
}
