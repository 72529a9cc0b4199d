// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Fails if one is already set.
    pub fn init(poll_interval_secs: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        describe_metrics();
        gauge!("relay_poll_interval_secs").set(poll_interval_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_cycles_total", "Poll cycles run.");
        describe_counter!("relay_fetch_failures_total", "Cycles whose feed fetch failed.");
        describe_counter!("relay_items_new_total", "Fetched items not seen before.");
        describe_counter!("relay_matches_total", "Items that matched at least one rule.");
        describe_counter!(
            "relay_notifications_sent_total",
            "Notifications (individual or summary) delivered."
        );
        describe_counter!(
            "relay_notifications_failed_total",
            "Notifications that exhausted their retries."
        );
        describe_counter!("relay_send_attempts_total", "Individual send attempts.");
        describe_counter!("relay_health_alerts_total", "Feed outage alerts raised.");
        describe_counter!("relay_feed_items_total", "Items parsed from feed documents.");
        describe_histogram!("relay_cycle_duration_ms", "Wall time of one cycle in milliseconds.");
        describe_histogram!("relay_feed_parse_ms", "Feed document parse time in milliseconds.");
        describe_gauge!("relay_last_cycle_ts", "Unix ts when the last cycle finished.");
        describe_gauge!("relay_poll_interval_secs", "Configured poll interval.");
    });
}
