// src/lib.rs
// Public library surface for the service binary, `poll_once` and integration tests.

pub mod api;
pub mod config;
pub mod cycle;
pub mod dedup;
pub mod error;
pub mod health;
pub mod ingest;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::cycle::{CycleOutcome, CycleReport, Relay, RelaySettings};
pub use crate::error::{RelayError, Result};
pub use crate::health::{HealthState, HealthStatus};
pub use crate::store::{MemoryStore, RuleStore, SqliteStore};

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::ingest::providers::rss::RssFeedSource;
use crate::notify::TelegramChannel;

/// Build the production relay (SQLite store, HTTP feed, Telegram) from config.
pub fn build_relay(cfg: &RelayConfig) -> anyhow::Result<(Arc<SqliteStore>, Relay)> {
    use anyhow::Context;

    cfg.require_telegram()?;
    let store = Arc::new(
        SqliteStore::open(&cfg.database_path)
            .with_context(|| format!("opening rule store {}", cfg.database_path.display()))?,
    );
    let feed = RssFeedSource::http(
        &cfg.feed_url,
        std::time::Duration::from_secs(cfg.fetch_timeout_secs),
    )?;
    let channel = TelegramChannel::new(
        cfg.telegram.bot_token.trim(),
        std::time::Duration::from_secs(cfg.delivery.send_timeout_secs),
    )?;
    let relay = Relay::new(
        store.clone(),
        Arc::new(feed),
        Arc::new(channel),
        cfg.relay_settings(),
    );
    Ok((store, relay))
}
