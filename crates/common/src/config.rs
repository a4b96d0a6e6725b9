use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// Redis connection string. When unset, escalation cooldowns live in Postgres.
    pub redis_url: Option<String>,

    /// Bind address for the health endpoint (e.g. `0.0.0.0:8088`). Disabled when unset.
    pub health_addr: Option<String>,

    /// Delay between dispatch runs in seconds (default: 300)
    pub poll_interval_sec: u64,

    /// File refreshed with a unix timestamp after every successful run
    pub heartbeat_file: PathBuf,

    /// Key for the Postgres advisory lock that guards a run
    pub advisory_lock_key: i64,

    pub dispatch: DispatchSettings,
    pub providers: ProviderConfig,
    pub operator: OperatorConfig,
}

/// Tunables for matching, claiming and delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    /// Due deliveries per alert and per owner across a run
    pub max_per_user: usize,
    /// Attempts before a delivery is given up on
    pub max_attempts: i32,
    pub retry_base_sec: u64,
    pub retry_max_sec: u64,
    /// How far behind the cursor the matcher resumes, to absorb visibility lag
    pub cursor_overlap_sec: i64,
    /// Maximum deliveries rendered into one email
    pub max_items_per_email: usize,
    pub backlog_warn_count: i64,
    pub backlog_warn_age_sec: i64,
    /// Dedupe window for owners without a preferences row
    pub default_dedupe_window_sec: i64,
    /// Priority categories for owners without their own list (lowercased)
    pub default_priority_categories: Vec<String>,
    /// Product name used in subjects and digest headers
    pub brand_name: String,
}

impl DispatchSettings {
    /// Number of catalog rows fetched per alert and run.
    pub fn match_limit(&self) -> i64 {
        self.max_per_user.max(self.max_items_per_email) as i64
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_per_user: 25,
            max_attempts: 5,
            retry_base_sec: 60,
            retry_max_sec: 3600,
            cursor_overlap_sec: 86_400,
            max_items_per_email: 50,
            backlog_warn_count: 200,
            backlog_warn_age_sec: 3600,
            default_dedupe_window_sec: 21_600,
            default_priority_categories: Vec::new(),
            brand_name: "NewsWire".to_string(),
        }
    }
}

/// Credentials for the user-facing message providers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,
    /// Email sender address
    pub email_from: String,
    /// Telegram bot token
    pub telegram_bot_token: Option<String>,
}

/// Where operator escalations go.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperatorConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub emails: Vec<String>,
    pub email_subject_prefix: String,
    pub giveup_cooldown_sec: u64,
    pub backlog_cooldown_sec: u64,
}

impl OperatorConfig {
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }

    /// Escalation is a no-op unless at least one operator channel is configured.
    pub fn enabled(&self) -> bool {
        self.telegram_enabled() || !self.emails.is_empty()
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = DispatchSettings::default();

        Ok(Self {
            database_url: var("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_or(var("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 5)?,
            redis_url: var("REDIS_URL"),
            health_addr: var("HEALTH_ADDR"),
            poll_interval_sec: parse_or(
                var("ALERTS_POLL_INTERVAL_SEC"),
                "ALERTS_POLL_INTERVAL_SEC",
                300,
            )?,
            heartbeat_file: var("ALERTS_HEARTBEAT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/newswire/alerts_last_ok.txt")),
            advisory_lock_key: parse_or(
                var("ALERTS_ADVISORY_LOCK_KEY"),
                "ALERTS_ADVISORY_LOCK_KEY",
                743_829_113,
            )?,
            dispatch: DispatchSettings {
                max_per_user: parse_or(
                    var("ALERTS_MAX_PER_USER"),
                    "ALERTS_MAX_PER_USER",
                    defaults.max_per_user,
                )?,
                max_attempts: parse_or(
                    var("ALERTS_MAX_ATTEMPTS"),
                    "ALERTS_MAX_ATTEMPTS",
                    defaults.max_attempts,
                )?,
                retry_base_sec: parse_or(
                    var("ALERTS_RETRY_BASE_SEC"),
                    "ALERTS_RETRY_BASE_SEC",
                    defaults.retry_base_sec,
                )?,
                retry_max_sec: parse_or(
                    var("ALERTS_RETRY_MAX_SEC"),
                    "ALERTS_RETRY_MAX_SEC",
                    defaults.retry_max_sec,
                )?,
                cursor_overlap_sec: parse_or(
                    var("ALERTS_CURSOR_OVERLAP_SEC"),
                    "ALERTS_CURSOR_OVERLAP_SEC",
                    defaults.cursor_overlap_sec,
                )?,
                max_items_per_email: parse_or(
                    var("ALERTS_MAX_ITEMS_PER_EMAIL"),
                    "ALERTS_MAX_ITEMS_PER_EMAIL",
                    defaults.max_items_per_email,
                )?
                .max(1),
                backlog_warn_count: parse_or(
                    var("ALERTS_BACKLOG_WARN_COUNT"),
                    "ALERTS_BACKLOG_WARN_COUNT",
                    defaults.backlog_warn_count,
                )?,
                backlog_warn_age_sec: parse_or(
                    var("ALERTS_BACKLOG_WARN_AGE_SEC"),
                    "ALERTS_BACKLOG_WARN_AGE_SEC",
                    defaults.backlog_warn_age_sec,
                )?,
                default_dedupe_window_sec: parse_or(
                    var("ALERTS_DEDUPE_WINDOW_SEC"),
                    "ALERTS_DEDUPE_WINDOW_SEC",
                    defaults.default_dedupe_window_sec,
                )?,
                default_priority_categories: var("ALERTS_PRIORITY_CATEGORIES")
                    .map(|raw| {
                        split_list(&raw)
                            .into_iter()
                            .map(|c| c.to_lowercase())
                            .collect()
                    })
                    .unwrap_or_default(),
                brand_name: var("ALERTS_BRAND_NAME").unwrap_or(defaults.brand_name),
            },
            providers: ProviderConfig {
                resend_api_key: var("RESEND_API_KEY"),
                email_from: var("ALERTS_FROM_EMAIL")
                    .unwrap_or_else(|| "alerts@newswire.local".to_string()),
                telegram_bot_token: var("TELEGRAM_BOT_TOKEN"),
            },
            operator: OperatorConfig {
                telegram_bot_token: var("ALERTS_ADMIN_TELEGRAM_BOT_TOKEN"),
                telegram_chat_id: var("ALERTS_ADMIN_TELEGRAM_CHAT_ID"),
                emails: var("ALERTS_ADMIN_EMAILS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_default(),
                email_subject_prefix: var("ALERTS_ADMIN_EMAIL_SUBJECT_PREFIX").unwrap_or_default(),
                giveup_cooldown_sec: parse_or(
                    var("ALERTS_ADMIN_NOTIFY_GIVEUP_COOLDOWN_SEC"),
                    "ALERTS_ADMIN_NOTIFY_GIVEUP_COOLDOWN_SEC",
                    3600,
                )?,
                backlog_cooldown_sec: parse_or(
                    var("ALERTS_ADMIN_NOTIFY_BACKLOG_COOLDOWN_SEC"),
                    "ALERTS_ADMIN_NOTIFY_BACKLOG_COOLDOWN_SEC",
                    1800,
                )?,
            },
        })
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: FromStr>(raw: Option<String>, name: &str, default: T) -> anyhow::Result<T> {
    match raw {
        Some(value) => value.parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}
