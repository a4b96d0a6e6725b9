//! Delivery dispatch for one alert: select due work, render, send, record.
//!
//! Batch-capable channels get one digest per chunk of due deliveries and the
//! chunk shares a single outcome. Other channels get one message per delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use uuid::Uuid;

use newswire_common::config::DispatchSettings;
use newswire_common::error::DispatchError;
use newswire_common::types::{Article, Channel, DueDelivery, Priority, UserPreferences};
use newswire_engine::alerts::ActiveAlert;
use newswire_engine::matcher::ArticleMatcher;
use newswire_engine::priority;
use newswire_notifier::escalation::{Escalator, GiveUp};
use newswire_notifier::render;
use newswire_notifier::sender::SenderRegistry;

use crate::retry::{self, FailureRecord, RetryPolicy};
use crate::summary::{RunSummary, elapsed_ms};

/// Stored on deliveries whose article disappeared from the catalog.
pub const MISSING_ARTICLE: &str = "missing_article";

const DEFAULT_SEARCH_NAME: &str = "Saved search";

/// Run-wide cap on due deliveries handled per owner across all their alerts.
#[derive(Debug, Default)]
pub struct OwnerBudget {
    cap: usize,
    used: HashMap<Uuid, usize>,
}

impl OwnerBudget {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            used: HashMap::new(),
        }
    }

    /// Consume one unit for `user_id`; `false` once the owner is at the cap.
    pub fn take(&mut self, user_id: Uuid) -> bool {
        let used = self.used.entry(user_id).or_insert(0);
        if *used >= self.cap {
            return false;
        }
        *used += 1;
        true
    }
}

/// Group due deliveries by dedupe key, keeping first-seen order.
pub fn group_by_dedupe_key<'a>(items: &'a [(DueDelivery, Article)]) -> Vec<Vec<&'a Article>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&'a Article>> = HashMap::new();

    for (delivery, article) in items {
        let key = if delivery.dedupe_key.is_empty() {
            article.id.to_string()
        } else {
            delivery.dedupe_key.clone()
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(article);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}

pub struct Dispatcher {
    senders: SenderRegistry,
    escalator: Arc<Escalator>,
    policy: RetryPolicy,
    max_per_user: usize,
    max_items_per_email: usize,
    brand: String,
}

impl Dispatcher {
    pub fn new(settings: &DispatchSettings, senders: SenderRegistry, escalator: Arc<Escalator>) -> Self {
        Self {
            senders,
            escalator,
            policy: RetryPolicy::from_settings(settings),
            max_per_user: settings.max_per_user,
            max_items_per_email: settings.max_items_per_email.max(1),
            brand: settings.brand_name.clone(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Due deliveries for one alert on its channel. Rows whose stored priority
    /// the owner currently routes come first, then oldest schedule first, so
    /// orphaned rows only take up slots routable work leaves free.
    pub async fn load_due(
        &self,
        pool: &PgPool,
        active: &ActiveAlert,
        prefs: &UserPreferences,
    ) -> Result<Vec<DueDelivery>, DispatchError> {
        let routed: Vec<String> = [Priority::P0, Priority::P1, Priority::P2]
            .into_iter()
            .filter(|p| prefs.routes(*p))
            .map(|p| p.as_str().to_string())
            .collect();

        let rows = sqlx::query_as(
            r#"
            SELECT
              d.id, d.alert_id, d.user_id, d.article_id, d.channel, a.target,
              d.attempt_count, d.dedupe_key, d.priority
            FROM alert_deliveries d
            JOIN alerts a ON a.id = d.alert_id
            WHERE d.alert_id = $1
              AND d.channel = $2
              AND d.status IN ('PENDING', 'FAILED')
              AND d.next_attempt_at <= now()
              AND d.attempt_count < $3
            ORDER BY (d.priority = ANY($5)) DESC, d.next_attempt_at ASC, d.created_at ASC
            LIMIT $4
            "#,
        )
        .bind(active.alert.id)
        .bind(&active.alert.channel)
        .bind(self.policy.max_attempts)
        .bind(self.max_per_user as i64)
        .bind(&routed)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Dispatch everything due for `active` on `channel`.
    pub async fn dispatch_alert(
        &self,
        pool: &PgPool,
        matcher: &ArticleMatcher,
        active: &ActiveAlert,
        channel: Channel,
        prefs: &UserPreferences,
        budget: &mut OwnerBudget,
        summary: &mut RunSummary,
    ) -> Result<(), DispatchError> {
        let due = self.load_due(pool, active, prefs).await?;
        if due.is_empty() {
            return Ok(());
        }

        let mut ready: Vec<(DueDelivery, Article)> = Vec::new();
        for mut delivery in due {
            // Unrouted rows never consume the owner's budget.
            if !self.route(pool, active, prefs, &mut delivery).await? {
                summary.unrouted += 1;
                continue;
            }

            if !budget.take(delivery.user_id) {
                continue;
            }

            match matcher.fetch_article(pool, delivery.article_id).await? {
                Some(article) => ready.push((delivery, article)),
                None => {
                    tracing::warn!(
                        delivery_id = %delivery.id,
                        article_id = delivery.article_id,
                        "Delivery references a missing article"
                    );
                    let mut conn = pool.acquire().await?;
                    let record =
                        retry::mark_failed(&mut conn, &self.policy, delivery.id, delivery.attempt_count, MISSING_ARTICLE)
                            .await?;
                    drop(conn);
                    self.after_failure(&delivery, record, MISSING_ARTICLE, summary).await;
                }
            }
        }

        if ready.is_empty() {
            return Ok(());
        }

        if channel.is_batch_capable() {
            for chunk in ready.chunks(self.max_items_per_email) {
                self.send_digest(pool, active, channel, chunk, summary).await?;
            }
        } else {
            for (delivery, article) in &ready {
                self.send_single(pool, channel, delivery, article, summary).await?;
            }
        }

        Ok(())
    }

    /// Whether a due delivery may be sent under the owner's current routing.
    /// An orphaned priority is re-derived from the saved search and persisted
    /// when the new one routes.
    async fn route(
        &self,
        pool: &PgPool,
        active: &ActiveAlert,
        prefs: &UserPreferences,
        delivery: &mut DueDelivery,
    ) -> Result<bool, DispatchError> {
        if prefs.routes(delivery.priority) {
            return Ok(true);
        }

        let current = priority::classify(&active.search, &prefs.priority_categories);
        if !prefs.routes(current) {
            tracing::info!(
                delivery_id = %delivery.id,
                user_id = %delivery.user_id,
                priority = %delivery.priority,
                reclassified = %current,
                "Delivery priority not routed, left pending"
            );
            return Ok(false);
        }

        reprioritize(pool, delivery.id, current).await?;
        tracing::info!(
            delivery_id = %delivery.id,
            from = %delivery.priority,
            to = %current,
            "Delivery priority re-evaluated"
        );
        delivery.priority = current;
        Ok(true)
    }

    async fn send_digest(
        &self,
        pool: &PgPool,
        active: &ActiveAlert,
        channel: Channel,
        chunk: &[(DueDelivery, Article)],
        summary: &mut RunSummary,
    ) -> Result<(), DispatchError> {
        let Some((first, _)) = chunk.first() else {
            return Ok(());
        };

        let groups = group_by_dedupe_key(chunk);
        let name = active
            .search
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_SEARCH_NAME);
        let subject = render::digest_subject(&self.brand, name, groups.len());
        let body = render::render_digest(&groups, &self.brand);

        tracing::debug!(
            alert_id = %active.alert.id,
            groups = groups.len(),
            items = chunk.len(),
            "Digest grouped"
        );

        let started = Instant::now();
        let result = self
            .senders
            .send(channel, &first.target, Some(&subject), &body)
            .await;
        summary.timings.send_ms += elapsed_ms(started);

        let mut tx = pool.begin().await?;
        match result {
            Ok(()) => {
                let ids: Vec<Uuid> = chunk.iter().map(|(d, _)| d.id).collect();
                retry::mark_sent(&mut tx, &ids).await?;
                tx.commit().await?;
                summary.sent += chunk.len() as u64;

                tracing::info!(
                    alert_id = %active.alert.id,
                    channel = %channel,
                    items = chunk.len(),
                    "Digest delivered"
                );
            }
            Err(e) => {
                let error = e.to_string();
                let mut records = Vec::with_capacity(chunk.len());
                for (delivery, _) in chunk {
                    let record =
                        retry::mark_failed(&mut tx, &self.policy, delivery.id, delivery.attempt_count, &error).await?;
                    records.push(record);
                }
                tx.commit().await?;

                tracing::warn!(
                    alert_id = %active.alert.id,
                    channel = %channel,
                    items = chunk.len(),
                    error = %error,
                    "Digest delivery failed"
                );
                for ((delivery, _), record) in chunk.iter().zip(records) {
                    self.after_failure(delivery, record, &error, summary).await;
                }
            }
        }

        Ok(())
    }

    async fn send_single(
        &self,
        pool: &PgPool,
        channel: Channel,
        delivery: &DueDelivery,
        article: &Article,
        summary: &mut RunSummary,
    ) -> Result<(), DispatchError> {
        let subject = render::item_subject(&self.brand, article);
        let body = render::render_item(article);

        let started = Instant::now();
        let result = self
            .senders
            .send(channel, &delivery.target, Some(&subject), &body)
            .await;
        summary.timings.send_ms += elapsed_ms(started);

        let mut conn = pool.acquire().await?;
        match result {
            Ok(()) => {
                retry::mark_sent(&mut conn, &[delivery.id]).await?;
                summary.sent += 1;
                tracing::info!(
                    delivery_id = %delivery.id,
                    channel = %channel,
                    "Delivery sent"
                );
            }
            Err(e) => {
                let error = e.to_string();
                let record =
                    retry::mark_failed(&mut conn, &self.policy, delivery.id, delivery.attempt_count, &error).await?;
                drop(conn);
                tracing::warn!(
                    delivery_id = %delivery.id,
                    channel = %channel,
                    error = %error,
                    "Delivery failed"
                );
                self.after_failure(delivery, record, &error, summary).await;
            }
        }

        Ok(())
    }

    /// Count a recorded failure and escalate when it was the last attempt.
    async fn after_failure(
        &self,
        delivery: &DueDelivery,
        record: FailureRecord,
        error: &str,
        summary: &mut RunSummary,
    ) {
        match record {
            FailureRecord::Untouched => {}
            FailureRecord::Retrying { attempt, backoff_sec } => {
                summary.failed += 1;
                tracing::debug!(
                    delivery_id = %delivery.id,
                    attempt,
                    backoff_sec,
                    "Delivery scheduled for retry"
                );
            }
            FailureRecord::GaveUp { attempt } => {
                summary.failed += 1;
                summary.giveup += 1;

                let giveup = GiveUp {
                    alert_id: delivery.alert_id,
                    user_id: delivery.user_id,
                    channel: delivery.channel.clone(),
                    target: delivery.target.clone(),
                    attempts: attempt,
                    error: error.to_string(),
                };
                tracing::error!(
                    alert_id = %giveup.alert_id,
                    user_id = %giveup.user_id,
                    channel = %giveup.channel,
                    alert_target = %giveup.target.trim(),
                    attempts = attempt,
                    error = %newswire_common::text::truncate_chars(error, 200),
                    "Delivery given up"
                );
                self.escalator.notify_giveup(&giveup).await;
            }
        }
    }
}

async fn reprioritize(pool: &PgPool, delivery_id: Uuid, priority: Priority) -> Result<(), DispatchError> {
    sqlx::query("UPDATE alert_deliveries SET priority = $2 WHERE id = $1 AND status <> 'SENT'")
        .bind(delivery_id)
        .bind(priority.as_str())
        .execute(pool)
        .await?;
    Ok(())
}
