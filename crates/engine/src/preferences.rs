//! Preference resolver: per-owner delivery preferences with run-scoped caching.
//!
//! Owners without a `user_alert_prefs` row, or with empty columns in it, get
//! the defaults: a 6h dedupe window, P0 immediate, P1/P2 digest, email only.
//! A resolver lives for exactly one run so preference edits take effect on the
//! next sweep.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use newswire_common::error::DispatchError;
use newswire_common::types::{PreferenceSource, Priority, UserPreferences};

#[derive(Debug, Clone, sqlx::FromRow)]
struct PreferencesRow {
    dedupe_window_sec: Option<i32>,
    immediate_priorities: Option<Vec<String>>,
    digest_priorities: Option<Vec<String>>,
    priority_categories: Option<Vec<String>>,
    channels_enabled: Option<Vec<String>>,
}

/// Partial update for an owner's preferences. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct PreferencesUpdate {
    pub dedupe_window_sec: Option<i32>,
    pub immediate_priorities: Option<Vec<Priority>>,
    pub digest_priorities: Option<Vec<Priority>>,
    pub priority_categories: Option<Vec<String>>,
    /// Reset priority categories to the deployment-wide default.
    pub clear_priority_categories: bool,
    pub channels_enabled: Option<Vec<String>>,
}

/// Run-scoped preference cache.
pub struct PreferenceResolver {
    default_window_sec: i64,
    default_categories: Vec<String>,
    cache: HashMap<Uuid, UserPreferences>,
}

impl PreferenceResolver {
    pub fn new(default_window_sec: i64, default_categories: Vec<String>) -> Self {
        Self {
            default_window_sec,
            default_categories,
            cache: HashMap::new(),
        }
    }

    /// Resolve an owner's preferences, hitting the database once per run.
    pub async fn resolve(
        &mut self,
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<UserPreferences, DispatchError> {
        if let Some(prefs) = self.cache.get(&user_id) {
            return Ok(prefs.clone());
        }

        let row = load_row(pool, user_id).await?;
        let prefs = self.merge(user_id, row);

        tracing::info!(
            user_id = %user_id,
            source = %prefs.source,
            dedupe_window = prefs.dedupe_window_sec,
            immediate = %join(&prefs.immediate_priorities),
            digest = %join(&prefs.digest_priorities),
            categories = %prefs.priority_categories.join(","),
            "Resolved owner preferences"
        );

        self.cache.insert(user_id, prefs.clone());
        Ok(prefs)
    }

    fn merge(&self, user_id: Uuid, row: Option<PreferencesRow>) -> UserPreferences {
        let mut prefs = UserPreferences::defaults(
            user_id,
            self.default_window_sec,
            self.default_categories.clone(),
        );

        let Some(row) = row else {
            return prefs;
        };

        prefs.source = PreferenceSource::Stored;
        if let Some(window) = row.dedupe_window_sec.filter(|w| *w > 0) {
            prefs.dedupe_window_sec = i64::from(window);
        }
        if let Some(immediate) = parse_priorities(row.immediate_priorities) {
            prefs.immediate_priorities = immediate;
        }
        if let Some(digest) = parse_priorities(row.digest_priorities) {
            prefs.digest_priorities = digest;
        }
        if let Some(categories) = non_empty(row.priority_categories) {
            prefs.priority_categories = categories
                .into_iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(channels) = non_empty(row.channels_enabled) {
            prefs.channels_enabled = channels
                .into_iter()
                .map(|c| c.trim().to_lowercase())
                .collect();
        }

        prefs
    }

    /// Insert or update an owner's preferences and return the resolved result.
    pub async fn upsert(
        &mut self,
        pool: &PgPool,
        user_id: Uuid,
        update: &PreferencesUpdate,
    ) -> Result<UserPreferences, DispatchError> {
        if let Some(window) = update.dedupe_window_sec
            && window <= 0
        {
            return Err(DispatchError::Validation(
                "dedupe_window_sec must be positive".to_string(),
            ));
        }

        let to_text = |list: &Option<Vec<Priority>>| {
            list.as_ref()
                .filter(|l| !l.is_empty())
                .map(|l| l.iter().map(|p| p.to_string()).collect::<Vec<_>>())
        };
        let clean = |list: &Option<Vec<String>>| {
            list.as_ref()
                .map(|l| {
                    l.iter()
                        .map(|v| v.trim().to_lowercase())
                        .filter(|v| !v.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|l| !l.is_empty())
        };

        let row: PreferencesRow = sqlx::query_as(
            r#"
            INSERT INTO user_alert_prefs (
              user_id, dedupe_window_sec, immediate_priorities, digest_priorities,
              priority_categories, channels_enabled, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (user_id) DO UPDATE SET
              dedupe_window_sec = COALESCE(EXCLUDED.dedupe_window_sec, user_alert_prefs.dedupe_window_sec),
              immediate_priorities = COALESCE(EXCLUDED.immediate_priorities, user_alert_prefs.immediate_priorities),
              digest_priorities = COALESCE(EXCLUDED.digest_priorities, user_alert_prefs.digest_priorities),
              priority_categories = CASE
                WHEN $7 THEN NULL
                ELSE COALESCE(EXCLUDED.priority_categories, user_alert_prefs.priority_categories)
              END,
              channels_enabled = COALESCE(EXCLUDED.channels_enabled, user_alert_prefs.channels_enabled),
              updated_at = now()
            RETURNING dedupe_window_sec, immediate_priorities, digest_priorities,
                      priority_categories, channels_enabled
            "#,
        )
        .bind(user_id)
        .bind(update.dedupe_window_sec)
        .bind(to_text(&update.immediate_priorities))
        .bind(to_text(&update.digest_priorities))
        .bind(if update.clear_priority_categories {
            None
        } else {
            clean(&update.priority_categories)
        })
        .bind(clean(&update.channels_enabled))
        .bind(update.clear_priority_categories)
        .fetch_one(pool)
        .await?;

        let prefs = self.merge(user_id, Some(row));
        self.cache.insert(user_id, prefs.clone());

        tracing::info!(user_id = %user_id, "Owner preferences updated");
        Ok(prefs)
    }
}

async fn load_row(pool: &PgPool, user_id: Uuid) -> Result<Option<PreferencesRow>, DispatchError> {
    let row = sqlx::query_as(
        r#"
        SELECT
          dedupe_window_sec,
          immediate_priorities,
          digest_priorities,
          priority_categories,
          channels_enabled
        FROM user_alert_prefs
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

fn non_empty(list: Option<Vec<String>>) -> Option<Vec<String>> {
    list.filter(|l| l.iter().any(|v| !v.trim().is_empty()))
}

/// Parse a stored priority list, ignoring unknown entries. Empty ⇒ `None`.
fn parse_priorities(list: Option<Vec<String>>) -> Option<Vec<Priority>> {
    let parsed: Vec<Priority> = list?
        .iter()
        .filter_map(|p| p.parse::<Priority>().ok())
        .collect();
    (!parsed.is_empty()).then_some(parsed)
}

fn join(priorities: &[Priority]) -> String {
    priorities
        .iter()
        .map(Priority::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
