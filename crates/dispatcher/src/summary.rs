//! Per-run counters and phase timings.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use newswire_common::types::Priority;

use crate::backlog::BacklogStats;

/// Newly queued deliveries by priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub p0: u64,
    pub p1: u64,
    pub p2: u64,
}

impl PriorityCounts {
    pub fn add(&mut self, priority: Priority, count: u64) {
        match priority {
            Priority::P0 => self.p0 += count,
            Priority::P1 => self.p1 += count,
            Priority::P2 => self.p2 += count,
        }
    }
}

/// Milliseconds spent per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub match_ms: u64,
    pub claim_ms: u64,
    pub send_ms: u64,
    pub backlog_ms: u64,
    pub total_ms: u64,
}

pub fn elapsed_ms(since: Instant) -> u64 {
    millis(since.elapsed())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Active alerts examined.
    pub checked: u64,
    pub queued: u64,
    /// Claim conflicts, dedupe skips and disabled-channel skips.
    pub skipped: u64,
    pub sent: u64,
    pub failed: u64,
    pub giveup: u64,
    /// Due deliveries held back because their priority routes nowhere.
    pub unrouted: u64,
    pub alert_errors: u64,
    pub priorities: PriorityCounts,
    pub backlog: BacklogStats,
    pub timings: PhaseTimings,
    /// Set when the run aborted; the counters then cover the work done so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            checked: 0,
            queued: 0,
            skipped: 0,
            sent: 0,
            failed: 0,
            giveup: 0,
            unrouted: 0,
            alert_errors: 0,
            priorities: PriorityCounts::default(),
            backlog: BacklogStats::default(),
            timings: PhaseTimings::default(),
            error: None,
        }
    }

    pub fn finish(&mut self, started: Instant) {
        self.finished_at = Some(Utc::now());
        self.timings.total_ms = elapsed_ms(started);
    }

    /// Close an aborted run, keeping whatever was counted before `error`.
    pub fn fail(&mut self, started: Instant, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
        self.finish(started);
    }

    /// Emit an aborted run with its partial counters.
    pub fn log_failure(&self) {
        tracing::error!(
            checked = self.checked,
            queued = self.queued,
            sent = self.sent,
            failed = self.failed,
            giveup = self.giveup,
            unrouted = self.unrouted,
            alert_errors = self.alert_errors,
            total_ms = self.timings.total_ms,
            error = self.error.as_deref().unwrap_or_default(),
            "Dispatch run aborted"
        );
    }

    /// Emit the run as one structured log line.
    pub fn log(&self) {
        tracing::info!(
            checked = self.checked,
            queued = self.queued,
            skipped = self.skipped,
            sent = self.sent,
            failed = self.failed,
            giveup = self.giveup,
            unrouted = self.unrouted,
            alert_errors = self.alert_errors,
            p0 = self.priorities.p0,
            p1 = self.priorities.p1,
            p2 = self.priorities.p2,
            pending = self.backlog.pending,
            pending_due = self.backlog.pending_due,
            oldest_age_sec = self.backlog.oldest_age_sec,
            next_due_in_sec = self.backlog.next_due_in_sec,
            queued_at_estimated = self.backlog.queued_at_estimated,
            giveup_total = self.backlog.giveup_total,
            match_ms = self.timings.match_ms,
            claim_ms = self.timings.claim_ms,
            send_ms = self.timings.send_ms,
            backlog_ms = self.timings.backlog_ms,
            total_ms = self.timings.total_ms,
            "Dispatch run completed"
        );
    }
}
