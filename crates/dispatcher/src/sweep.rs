//! Claim phase for one alert: match, derive keys, claim, advance the cursor.

use std::time::Instant;

use sqlx::PgPool;

use newswire_common::error::DispatchError;
use newswire_common::types::UserPreferences;
use newswire_engine::alerts::ActiveAlert;
use newswire_engine::claimer::{ClaimCandidate, DeliveryClaimer};
use newswire_engine::cursor::{CursorTracker, merge_watermark};
use newswire_engine::dedupe::dedupe_key;
use newswire_engine::matcher::ArticleMatcher;
use newswire_engine::priority;

use crate::summary::{RunSummary, elapsed_ms};

/// Claim deliveries for every new match of `active`. The cursor only moves
/// once the claims are committed.
pub async fn claim_new_matches(
    pool: &PgPool,
    matcher: &ArticleMatcher,
    active: &ActiveAlert,
    prefs: &UserPreferences,
    match_limit: i64,
    summary: &mut RunSummary,
) -> Result<(), DispatchError> {
    let alert = &active.alert;

    let started = Instant::now();
    let cursor = CursorTracker::load(pool, alert.id).await?;
    let matches = matcher
        .find_matches(pool, &active.search, cursor.map(|c| c.last_ts), match_limit)
        .await?;
    summary.timings.match_ms += elapsed_ms(started);

    if matches.is_empty() {
        return Ok(());
    }

    let started = Instant::now();
    let priority = priority::classify(&active.search, &prefs.priority_categories);
    let candidates: Vec<ClaimCandidate> = matches
        .iter()
        .map(|article| {
            let key = dedupe_key(article);
            ClaimCandidate {
                article_id: article.id,
                dedupe_key: key.key,
                normalized_url: key.normalized_url,
            }
        })
        .collect();

    let outcome = DeliveryClaimer::claim(pool, alert, prefs, priority, &candidates).await?;

    if let Some(observed) = merge_watermark(None, matches.iter().map(|a| a.published_at)) {
        CursorTracker::advance(pool, alert.id, observed).await?;
    }
    summary.timings.claim_ms += elapsed_ms(started);

    summary.queued += u64::from(outcome.claimed);
    summary.skipped += u64::from(outcome.skipped());
    summary.priorities.add(priority, u64::from(outcome.claimed));

    tracing::debug!(
        alert_id = %alert.id,
        matches = matches.len(),
        claimed = outcome.claimed,
        recent_duplicates = outcome.recent_duplicates,
        already_claimed = outcome.already_claimed,
        priority = %priority,
        "Alert matches claimed"
    );

    Ok(())
}
