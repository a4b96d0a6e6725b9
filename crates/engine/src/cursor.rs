//! Cursor tracker: per-alert resume watermark.
//!
//! The stored watermark is the newest publication time ever matched for the
//! alert. Writes merge with `GREATEST`, so an out-of-order scan can never move
//! it backward.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use newswire_common::error::DispatchError;
use newswire_common::types::DeliveryCursor;

pub struct CursorTracker;

impl CursorTracker {
    pub async fn load(pool: &PgPool, alert_id: Uuid) -> Result<Option<DeliveryCursor>, DispatchError> {
        let cursor = sqlx::query_as(
            "SELECT alert_id, last_ts, updated_at FROM alert_delivery_cursors WHERE alert_id = $1",
        )
        .bind(alert_id)
        .fetch_optional(pool)
        .await?;

        Ok(cursor)
    }

    /// Merge `observed` into the stored watermark and return the result.
    pub async fn advance(
        pool: &PgPool,
        alert_id: Uuid,
        observed: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, DispatchError> {
        let (last_ts,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO alert_delivery_cursors (alert_id, last_ts, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (alert_id) DO UPDATE SET
              last_ts = GREATEST(alert_delivery_cursors.last_ts, EXCLUDED.last_ts),
              updated_at = now()
            RETURNING last_ts
            "#,
        )
        .bind(alert_id)
        .bind(observed)
        .fetch_one(pool)
        .await?;

        tracing::debug!(alert_id = %alert_id, last_ts = %last_ts, "Cursor advanced");
        Ok(last_ts)
    }
}

/// Where the matcher resumes: the watermark minus the overlap margin.
pub fn resume_point(cursor: Option<DateTime<Utc>>, overlap_sec: i64) -> Option<DateTime<Utc>> {
    cursor.map(|ts| ts - chrono::Duration::seconds(overlap_sec.max(0)))
}

/// Monotone merge of a watermark with newly observed timestamps.
pub fn merge_watermark<I>(current: Option<DateTime<Utc>>, observed: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    observed.into_iter().fold(current, |acc, ts| match acc {
        Some(prev) if prev >= ts => Some(prev),
        _ => Some(ts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_merge_takes_maximum_in_any_order() {
        assert_eq!(merge_watermark(None, [at(3), at(9), at(1)]), Some(at(9)));
        assert_eq!(merge_watermark(None, [at(9), at(3)]), Some(at(9)));
    }

    #[test]
    fn test_merge_never_decreases() {
        assert_eq!(merge_watermark(Some(at(12)), [at(3), at(9)]), Some(at(12)));
        assert_eq!(merge_watermark(Some(at(12)), []), Some(at(12)));
    }

    #[test]
    fn test_merge_empty() {
        assert_eq!(merge_watermark(None, []), None);
    }

    #[test]
    fn test_resume_point_applies_overlap() {
        assert_eq!(resume_point(Some(at(12)), 3600), Some(at(11)));
        assert_eq!(resume_point(None, 3600), None);
        assert_eq!(resume_point(Some(at(12)), -5), Some(at(12)));
    }
}
