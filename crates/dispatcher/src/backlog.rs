//! Backlog monitor: queue depth and age after each sweep.

use serde::Serialize;
use sqlx::PgPool;

use newswire_common::config::DispatchSettings;
use newswire_common::error::DispatchError;
use newswire_notifier::escalation::{BacklogWarning, EscalationOutcome, Escalator};

/// Snapshot of undelivered work. Ages are whole seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BacklogStats {
    /// Retryable deliveries (PENDING or FAILED below the attempt ceiling).
    pub pending: i64,
    /// Retryable deliveries whose next attempt is due now.
    pub pending_due: i64,
    /// Age of the oldest retryable delivery with a trusted queue time.
    pub oldest_age_sec: i64,
    /// Seconds until the next scheduled retry, 0 when none is scheduled.
    pub next_due_in_sec: i64,
    /// Retryable deliveries whose queue time was backfilled.
    pub queued_at_estimated: i64,
    /// Deliveries that exhausted their attempts.
    pub giveup_total: i64,
}

pub struct BacklogMonitor {
    max_attempts: i32,
    warn_count: i64,
    warn_age_sec: i64,
}

impl BacklogMonitor {
    pub fn new(settings: &DispatchSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            warn_count: settings.backlog_warn_count,
            warn_age_sec: settings.backlog_warn_age_sec,
        }
    }

    pub async fn snapshot(&self, pool: &PgPool) -> Result<BacklogStats, DispatchError> {
        let stats = sqlx::query_as(
            r#"
            SELECT
              COUNT(*) FILTER (
                WHERE status IN ('PENDING', 'FAILED') AND attempt_count < $1
              ) AS pending,
              COUNT(*) FILTER (
                WHERE status IN ('PENDING', 'FAILED')
                  AND attempt_count < $1
                  AND next_attempt_at <= now()
              ) AS pending_due,
              COALESCE(EXTRACT(EPOCH FROM (
                now() - MIN(queued_at) FILTER (
                  WHERE status IN ('PENDING', 'FAILED')
                    AND attempt_count < $1
                    AND queued_at_is_estimated = false
                )
              )), 0)::bigint AS oldest_age_sec,
              COALESCE(EXTRACT(EPOCH FROM (
                MIN(next_attempt_at) FILTER (
                  WHERE status IN ('PENDING', 'FAILED')
                    AND attempt_count < $1
                    AND next_attempt_at > now()
                ) - now()
              )), 0)::bigint AS next_due_in_sec,
              COUNT(*) FILTER (
                WHERE status IN ('PENDING', 'FAILED')
                  AND attempt_count < $1
                  AND queued_at_is_estimated = true
              ) AS queued_at_estimated,
              COUNT(*) FILTER (
                WHERE status = 'FAILED' AND attempt_count >= $1
              ) AS giveup_total
            FROM alert_deliveries
            "#,
        )
        .bind(self.max_attempts)
        .fetch_one(pool)
        .await?;

        Ok(stats)
    }

    /// Whether the backlog crossed the count or the age threshold.
    pub fn exceeds(&self, stats: &BacklogStats) -> bool {
        stats.pending_due >= self.warn_count || stats.oldest_age_sec >= self.warn_age_sec
    }

    pub fn warning(&self, stats: &BacklogStats) -> BacklogWarning {
        BacklogWarning {
            pending: stats.pending,
            pending_due: stats.pending_due,
            oldest_age_sec: stats.oldest_age_sec,
            next_due_in_sec: stats.next_due_in_sec,
            queued_at_estimated: stats.queued_at_estimated,
            warn_count: self.warn_count,
            warn_age_sec: self.warn_age_sec,
        }
    }

    /// Take a snapshot and escalate when it crosses a threshold.
    pub async fn check(
        &self,
        pool: &PgPool,
        escalator: &Escalator,
    ) -> Result<BacklogStats, DispatchError> {
        let stats = self.snapshot(pool).await?;

        if self.exceeds(&stats) {
            tracing::warn!(
                pending = stats.pending,
                pending_due = stats.pending_due,
                oldest_age_sec = stats.oldest_age_sec,
                next_due_in_sec = stats.next_due_in_sec,
                queued_at_estimated = stats.queued_at_estimated,
                warn_count = self.warn_count,
                warn_age_sec = self.warn_age_sec,
                "Delivery backlog above threshold"
            );
            let outcome = escalator.notify_backlog(&self.warning(&stats)).await;
            if outcome == EscalationOutcome::Suppressed {
                tracing::debug!("Backlog escalation in cooldown");
            }
        }

        if stats.giveup_total > 0 {
            tracing::debug!(giveup_total = stats.giveup_total, "Given-up deliveries retained");
        }

        Ok(stats)
    }
}
