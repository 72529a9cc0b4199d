// src/cycle.rs
//! One poll cycle: rules → fetch → health → dedup → match → dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::dedup::{self, Intake};
use crate::error::RelayError;
use crate::health::{HealthState, HealthStatus};
use crate::ingest::{FeedQuery, FeedSource};
use crate::matcher::MatchEngine;
use crate::metrics::describe_metrics;
use crate::model::{DeliveryOutcome, RuleFault};
use crate::notify::{
    format, send_with_retry, DispatchSettings, Dispatcher, MessageChannel, SendOutcome,
};
use crate::shutdown::ShutdownSignal;
use crate::store::RuleStore;

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub dispatch: DispatchSettings,
    pub alert_threshold: u32,
    pub fetch_timeout: Duration,
    pub match_body: bool,
    /// Shown in the health alert, e.g. the feed URL.
    pub source_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Items were matched and dispatched (possibly none).
    Completed,
    /// First startup: the ledger was seeded and nothing was sent.
    Seeded,
    FetchFailed,
    /// The rule store could not be read or written; nothing was sent.
    StorageFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: CycleOutcome,
    pub fetched: usize,
    pub new_items: usize,
    pub matched: usize,
    pub sent: usize,
    pub failed: usize,
    pub summarized: usize,
    pub deferred: usize,
    pub rule_faults: Vec<RuleFault>,
    /// Outcome of the health alert, when one was due this cycle.
    pub alert: Option<DeliveryOutcome>,
    pub health: HealthState,
    pub health_status: HealthStatus,
    pub error: Option<String>,
}

impl CycleReport {
    fn begin(health: HealthState) -> Self {
        Self {
            started_at: Utc::now(),
            duration_ms: 0,
            outcome: CycleOutcome::Completed,
            fetched: 0,
            new_items: 0,
            matched: 0,
            sent: 0,
            failed: 0,
            summarized: 0,
            deferred: 0,
            rule_faults: Vec::new(),
            alert: None,
            health,
            health_status: health.status(),
            error: None,
        }
    }
}

/// Everything a cycle needs, shared between the poll loop and one-shot runs.
pub struct Relay {
    store: Arc<dyn RuleStore>,
    feed: Arc<dyn FeedSource>,
    channel: Arc<dyn MessageChannel>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(
        store: Arc<dyn RuleStore>,
        feed: Arc<dyn FeedSource>,
        channel: Arc<dyn MessageChannel>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            store,
            feed,
            channel,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Run one cycle. Never fails: every problem ends up in the report, and the
    /// returned health state is what the next cycle must be given.
    pub async fn run_cycle(
        &self,
        mut health: HealthState,
        shutdown: &ShutdownSignal,
    ) -> (HealthState, CycleReport) {
        describe_metrics();
        let t0 = Instant::now();
        let mut report = CycleReport::begin(health);

        self.cycle_inner(&mut health, &mut report, shutdown).await;

        report.health = health;
        report.health_status = health.status();
        report.duration_ms = t0.elapsed().as_millis() as u64;

        counter!("relay_cycles_total").increment(1);
        histogram!("relay_cycle_duration_ms").record(report.duration_ms as f64);
        gauge!("relay_last_cycle_ts").set(Utc::now().timestamp() as f64);

        tracing::info!(
            target: "cycle",
            outcome = ?report.outcome,
            fetched = report.fetched,
            new = report.new_items,
            matched = report.matched,
            sent = report.sent,
            failed = report.failed,
            summarized = report.summarized,
            deferred = report.deferred,
            faults = report.rule_faults.len(),
            failures = health.consecutive_failures,
            took_ms = report.duration_ms,
            "cycle finished"
        );
        (health, report)
    }

    async fn cycle_inner(
        &self,
        health: &mut HealthState,
        report: &mut CycleReport,
        shutdown: &ShutdownSignal,
    ) {
        let snapshot = match self.store.list_enabled_rules() {
            Ok(s) => s,
            Err(e) => return storage_failed(report, e),
        };
        for fault in &snapshot.faults {
            let err = RelayError::InternalConsistency {
                rule_id: fault.rule_id.0,
                reason: fault.reason.clone(),
            };
            tracing::error!(target: "cycle", pattern = %fault.pattern, error = %err, "rule skipped");
        }
        report.rule_faults = snapshot.faults.clone();

        let query = FeedQuery::for_rules(&snapshot.rules);
        let fetched = match self.fetch(&query).await {
            Ok(items) => items,
            Err(e) => {
                report.outcome = CycleOutcome::FetchFailed;
                report.error = Some(e.to_string());
                self.on_fetch_failure(health, report, &e).await;
                return;
            }
        };
        if let Some(outage) = health.record_success() {
            tracing::info!(target: "cycle", after_failures = outage, "feed recovered");
        }
        report.fetched = fetched.len();

        let eligible = match dedup::intake(self.store.as_ref(), fetched) {
            Ok(Intake::FirstRun { .. }) => {
                report.outcome = CycleOutcome::Seeded;
                return;
            }
            Ok(Intake::Eligible(items)) => items,
            Err(e) => return storage_failed(report, e),
        };
        report.new_items = eligible.len();
        counter!("relay_items_new_total").increment(eligible.len() as u64);

        let engine = MatchEngine::new(&snapshot.rules, self.settings.match_body);
        let classified = dedup::classify(&engine, &eligible);
        report.matched = classified.hits.len();
        counter!("relay_matches_total").increment(classified.hits.len() as u64);

        if let Err(e) = dedup::record_unmatched(self.store.as_ref(), &classified.unmatched) {
            return storage_failed(report, e);
        }

        let dispatched = Dispatcher::new(
            self.store.as_ref(),
            self.channel.as_ref(),
            &self.settings.dispatch,
        )
        .dispatch(classified.hits, shutdown)
        .await;
        report.sent = dispatched.sent;
        report.failed = dispatched.failed;
        report.summarized = dispatched.summarized;
        report.deferred = dispatched.deferred;
    }

    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<crate::model::FeedItem>, RelayError> {
        match tokio::time::timeout(self.settings.fetch_timeout, self.feed.fetch_items(query)).await
        {
            Ok(res) => res,
            Err(_) => Err(RelayError::FetchFailure(format!(
                "{} did not answer within {:?}",
                self.feed.name(),
                self.settings.fetch_timeout
            ))),
        }
    }

    async fn on_fetch_failure(
        &self,
        health: &mut HealthState,
        report: &mut CycleReport,
        err: &RelayError,
    ) {
        counter!("relay_fetch_failures_total").increment(1);
        health.record_failure();
        tracing::warn!(
            target: "cycle",
            source = self.feed.name(),
            failures = health.consecutive_failures,
            error = %err,
            "fetch failed"
        );

        if !health.should_alert(self.settings.alert_threshold) {
            return;
        }
        let text = format::health_alert(
            health.consecutive_failures,
            &self.settings.source_label,
            &err.to_string(),
        );
        let outcome = send_with_retry(
            self.channel.as_ref(),
            &self.settings.dispatch.recipient,
            &text,
            &self.settings.dispatch.retry,
        )
        .await;
        // The flag is set even when the alert could not be delivered; one attempt
        // per outage.
        health.record_alert();
        counter!("relay_health_alerts_total").increment(1);
        report.alert = Some(match outcome {
            SendOutcome::Delivered { .. } => DeliveryOutcome::Delivered,
            SendOutcome::Failed { .. } => DeliveryOutcome::Failed,
        });
        tracing::warn!(
            target: "cycle",
            failures = health.consecutive_failures,
            delivered = outcome.is_delivered(),
            "feed health alert raised"
        );
    }
}

fn storage_failed(report: &mut CycleReport, e: RelayError) {
    tracing::error!(target: "cycle", error = %e, "rule store unavailable, skipping cycle");
    report.outcome = CycleOutcome::StorageFailed;
    report.error = Some(e.to_string());
}
