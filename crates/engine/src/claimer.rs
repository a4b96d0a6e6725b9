//! Delivery claimer: turns matches into uniquely-keyed PENDING deliveries.
//!
//! Claiming happens in two phases:
//! 1. One bulk lookup drops matches whose dedupe key this owner already
//!    received (or has queued) on the same channel within the dedupe window.
//! 2. Survivors are inserted with `ON CONFLICT (alert_id, article_id, channel)
//!    DO NOTHING`, so a re-match or a racing sweep degrades to a no-op.
//!
//! All inserts for one alert share a transaction; the cursor only moves after
//! it commits.

use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use newswire_common::error::DispatchError;
use newswire_common::text::truncate_chars;
use newswire_common::types::{Alert, Priority, UserPreferences};

/// One match ready to be claimed.
#[derive(Debug, Clone)]
pub struct ClaimCandidate {
    pub article_id: i64,
    pub dedupe_key: String,
    pub normalized_url: Option<String>,
}

/// What happened to a batch of candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// New PENDING deliveries.
    pub claimed: u32,
    /// Skipped because the owner saw the same story recently.
    pub recent_duplicates: u32,
    /// Skipped because the alert's channel is disabled for the owner.
    pub channel_disabled: u32,
    /// Already claimed earlier for this (alert, article, channel).
    pub already_claimed: u32,
}

impl ClaimOutcome {
    pub fn skipped(&self) -> u32 {
        self.recent_duplicates + self.channel_disabled + self.already_claimed
    }
}

/// Idempotent delivery creation.
pub struct DeliveryClaimer;

impl DeliveryClaimer {
    /// Claim deliveries for `alert` on its own channel.
    pub async fn claim(
        pool: &PgPool,
        alert: &Alert,
        prefs: &UserPreferences,
        priority: Priority,
        candidates: &[ClaimCandidate],
    ) -> Result<ClaimOutcome, DispatchError> {
        let mut outcome = ClaimOutcome::default();
        if candidates.is_empty() {
            return Ok(outcome);
        }

        let keys: Vec<String> = candidates.iter().map(|c| c.dedupe_key.clone()).collect();
        let recent = Self::recent_keys(
            pool,
            alert.user_id,
            &alert.channel,
            &keys,
            prefs.dedupe_window_sec,
        )
        .await?;

        let channel_enabled = prefs.channel_enabled(&alert.channel);
        let mut tx = pool.begin().await?;

        for candidate in candidates {
            if recent.contains(&candidate.dedupe_key) {
                tracing::debug!(
                    user_id = %alert.user_id,
                    channel = %alert.channel,
                    dedupe_key = %truncate_chars(&candidate.dedupe_key, 120),
                    reason = "recent_duplicate",
                    "Dedupe skip"
                );
                outcome.recent_duplicates += 1;
                continue;
            }

            if !channel_enabled {
                tracing::debug!(
                    user_id = %alert.user_id,
                    channel = %alert.channel,
                    reason = "disabled",
                    "Channel skip"
                );
                outcome.channel_disabled += 1;
                continue;
            }

            let inserted: Option<(Uuid,)> = sqlx::query_as(
                r#"
                INSERT INTO alert_deliveries (
                  id, alert_id, user_id, article_id, channel, status,
                  attempt_count, next_attempt_at, queued_at, queued_at_is_estimated,
                  dedupe_key, normalized_url, priority, created_at
                )
                VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, now(), now(), false, $6, $7, $8, now())
                ON CONFLICT (alert_id, article_id, channel) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(alert.id)
            .bind(alert.user_id)
            .bind(candidate.article_id)
            .bind(&alert.channel)
            .bind(&candidate.dedupe_key)
            .bind(candidate.normalized_url.as_deref())
            .bind(priority.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if inserted.is_some() {
                outcome.claimed += 1;
            } else {
                outcome.already_claimed += 1;
            }
        }

        tx.commit().await?;

        if outcome.channel_disabled > 0 {
            tracing::info!(
                alert_id = %alert.id,
                user_id = %alert.user_id,
                channel = %alert.channel,
                skipped = outcome.channel_disabled,
                "Channel disabled for owner, matches not queued"
            );
        }

        Ok(outcome)
    }

    /// Dedupe keys this owner already has on `channel` within the window.
    pub async fn recent_keys(
        pool: &PgPool,
        user_id: Uuid,
        channel: &str,
        keys: &[String],
        window_sec: i64,
    ) -> Result<HashSet<String>, DispatchError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT dedupe_key
            FROM alert_deliveries
            WHERE user_id = $1
              AND channel = $2
              AND dedupe_key = ANY($3)
              AND created_at >= now() - make_interval(secs => $4)
              AND status IN ('PENDING', 'FAILED', 'SENT')
            "#,
        )
        .bind(user_id)
        .bind(channel)
        .bind(keys)
        .bind(window_sec as f64)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}
