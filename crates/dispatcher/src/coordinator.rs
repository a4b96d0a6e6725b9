//! Run coordinator: single-writer lock, per-alert sweep, backlog check and
//! heartbeat, repeated on a fixed interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;

use newswire_common::config::AppConfig;
use newswire_common::error::DispatchError;
use newswire_common::types::Channel;
use newswire_engine::alerts::{ActiveAlert, AlertCatalog};
use newswire_engine::catalog::{CatalogSchema, ensure_delivery_tables};
use newswire_engine::matcher::ArticleMatcher;
use newswire_engine::preferences::PreferenceResolver;
use newswire_notifier::escalation::Escalator;
use newswire_notifier::sender::SenderRegistry;

use crate::backlog::BacklogMonitor;
use crate::dispatch::{Dispatcher, OwnerBudget};
use crate::health::LastRun;
use crate::heartbeat;
use crate::summary::{RunSummary, elapsed_ms};
use crate::sweep;

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Another instance holds the run lock.
    Skipped,
}

/// Delay after a failed run: a tenth of the poll interval, within [3s, 30s].
pub fn failure_backoff(poll_interval_sec: u64) -> Duration {
    Duration::from_secs((poll_interval_sec / 10).clamp(3, 30))
}

pub struct RunCoordinator {
    pool: PgPool,
    config: AppConfig,
    dispatcher: Dispatcher,
    escalator: Arc<Escalator>,
    backlog: BacklogMonitor,
    last_run: LastRun,
}

impl RunCoordinator {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        senders: SenderRegistry,
        escalator: Arc<Escalator>,
    ) -> Self {
        let dispatcher = Dispatcher::new(&config.dispatch, senders, escalator.clone());
        let backlog = BacklogMonitor::new(&config.dispatch);
        Self {
            pool,
            config,
            dispatcher,
            escalator,
            backlog,
            last_run: LastRun::default(),
        }
    }

    /// Share the last-run slot with the health endpoint.
    pub fn last_run(&self) -> LastRun {
        self.last_run.clone()
    }

    /// Poll forever. A failed run is logged and retried after a short pause.
    pub async fn run(&self) -> anyhow::Result<()> {
        let interval = Duration::from_secs(self.config.poll_interval_sec.max(1));
        let backoff = failure_backoff(self.config.poll_interval_sec);

        tracing::info!(
            poll_interval_sec = interval.as_secs(),
            escalation = self.escalator.enabled(),
            "Dispatch loop started"
        );

        loop {
            let delay = match self.run_once().await {
                Ok(_) => interval,
                Err(e) => {
                    tracing::error!(error = %e, backoff_sec = backoff.as_secs(), "Dispatch run failed");
                    backoff
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// One sweep under the advisory lock.
    pub async fn run_once(&self) -> Result<RunOutcome, DispatchError> {
        let started = Instant::now();

        // Transaction-scoped lock: released on commit, rollback or a dropped connection.
        let mut lock = self.pool.begin().await?;
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(self.config.advisory_lock_key)
            .fetch_one(&mut *lock)
            .await?;

        if !locked {
            lock.rollback().await?;
            tracing::info!(reason = "advisory_lock_busy", "Dispatch run skipped");
            return Ok(RunOutcome::Skipped);
        }

        let mut summary = RunSummary::start();
        let result = self.sweep(&mut summary).await;
        lock.rollback().await?;

        if let Err(e) = result {
            summary.fail(started, &e);
            summary.log_failure();
            *self.last_run.write().await = Some(summary);
            return Err(e);
        }
        summary.finish(started);

        if let Err(e) = heartbeat::touch(&self.config.heartbeat_file).await {
            tracing::warn!(
                path = %self.config.heartbeat_file.display(),
                error = %e,
                "Heartbeat write failed"
            );
        }

        summary.log();
        *self.last_run.write().await = Some(summary.clone());
        Ok(RunOutcome::Completed(summary))
    }

    /// Counters accumulate into `summary` even when the sweep aborts part way.
    async fn sweep(&self, summary: &mut RunSummary) -> Result<(), DispatchError> {
        let settings = &self.config.dispatch;

        let schema = CatalogSchema::introspect(&self.pool).await?;
        ensure_delivery_tables(&self.pool).await?;
        let matcher = ArticleMatcher::new(schema, settings.cursor_overlap_sec);

        let alerts = AlertCatalog::load_active(&self.pool).await?;
        summary.checked = alerts.len() as u64;

        let mut resolver = PreferenceResolver::new(
            settings.default_dedupe_window_sec,
            settings.default_priority_categories.clone(),
        );
        let mut budget = OwnerBudget::new(settings.max_per_user);

        for active in &alerts {
            let channel = match active.alert.channel.parse::<Channel>() {
                Ok(channel) => channel,
                Err(e) => {
                    tracing::warn!(alert_id = %active.alert.id, error = %e, "Alert skipped");
                    continue;
                }
            };

            if let Err(e) = self
                .process_alert(&matcher, &mut resolver, &mut budget, active, channel, summary)
                .await
            {
                summary.alert_errors += 1;
                tracing::error!(
                    alert_id = %active.alert.id,
                    saved_search_id = %active.search.id,
                    error = %e,
                    "Alert processing failed"
                );
            }
        }

        let backlog_started = Instant::now();
        summary.backlog = self.backlog.check(&self.pool, &self.escalator).await?;
        summary.timings.backlog_ms = elapsed_ms(backlog_started);

        Ok(())
    }

    async fn process_alert(
        &self,
        matcher: &ArticleMatcher,
        resolver: &mut PreferenceResolver,
        budget: &mut OwnerBudget,
        active: &ActiveAlert,
        channel: Channel,
        summary: &mut RunSummary,
    ) -> Result<(), DispatchError> {
        let prefs = resolver.resolve(&self.pool, active.alert.user_id).await?;

        sweep::claim_new_matches(
            &self.pool,
            matcher,
            active,
            &prefs,
            self.config.dispatch.match_limit(),
            summary,
        )
        .await?;

        self.dispatcher
            .dispatch_alert(&self.pool, matcher, active, channel, &prefs, budget, summary)
            .await
    }
}
