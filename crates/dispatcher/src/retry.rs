//! Retry bookkeeping: exponential backoff and terminal delivery updates.
//!
//! Both updates refuse to touch a row that is already `SENT`, so a delivery
//! can never regress from its terminal state.

use sqlx::PgConnection;
use uuid::Uuid;

use newswire_common::config::DispatchSettings;
use newswire_common::error::DispatchError;
use newswire_common::text::truncate_chars;

/// Longest error string stored on a delivery.
pub const MAX_ERROR_CHARS: usize = 500;

/// `min(cap, base * 2^(attempt - 1))`, saturating.
pub fn compute_backoff(attempt: i32, base_sec: u64, cap_sec: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).max(0) as u32;
    let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
    base_sec.saturating_mul(factor).min(cap_sec)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_sec: u64,
    pub cap_sec: u64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_sec: settings.retry_base_sec,
            cap_sec: settings.retry_max_sec,
        }
    }

    pub fn backoff(&self, attempt: i32) -> u64 {
        compute_backoff(attempt, self.base_sec, self.cap_sec)
    }

    /// Whether `attempt` used up the retry budget.
    pub fn exhausted(&self, attempt: i32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Result of recording one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRecord {
    /// Scheduled for another attempt after `backoff_sec`.
    Retrying { attempt: i32, backoff_sec: u64 },
    /// Attempt budget exhausted; the delivery leaves the due set for good.
    GaveUp { attempt: i32 },
    /// The row was already `SENT` (or gone); nothing changed.
    Untouched,
}

/// Record a failed attempt for a delivery whose stored attempt count is
/// `attempt_count`.
pub async fn mark_failed(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    delivery_id: Uuid,
    attempt_count: i32,
    error: &str,
) -> Result<FailureRecord, DispatchError> {
    let next_attempt = attempt_count.saturating_add(1);
    let backoff_sec = policy.backoff(next_attempt);

    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        UPDATE alert_deliveries
        SET status = 'FAILED',
            error = $2,
            attempt_count = attempt_count + 1,
            last_attempt_at = now(),
            next_attempt_at = now() + make_interval(secs => $3)
        WHERE id = $1
          AND status <> 'SENT'
        RETURNING attempt_count
        "#,
    )
    .bind(delivery_id)
    .bind(truncate_chars(error, MAX_ERROR_CHARS))
    .bind(backoff_sec as f64)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((attempt,)) = row else {
        return Ok(FailureRecord::Untouched);
    };

    if policy.exhausted(attempt) {
        Ok(FailureRecord::GaveUp { attempt })
    } else {
        Ok(FailureRecord::Retrying {
            attempt,
            backoff_sec,
        })
    }
}

/// Mark deliveries delivered. Returns the number of rows that changed.
pub async fn mark_sent(conn: &mut PgConnection, delivery_ids: &[Uuid]) -> Result<u64, DispatchError> {
    if delivery_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE alert_deliveries
        SET status = 'SENT',
            error = NULL,
            delivered_at = now(),
            attempt_count = attempt_count + 1,
            last_attempt_at = now(),
            next_attempt_at = now()
        WHERE id = ANY($1)
          AND status <> 'SENT'
        "#,
    )
    .bind(delivery_ids)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
