// src/config/mod.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cycle::RelaySettings;
use crate::ingest::providers::rss::DEFAULT_FEED_URL;
use crate::notify::retry::MAX_SEND_ATTEMPTS;
use crate::notify::{DispatchSettings, Recipient, RetryPolicy};
use crate::scheduler::PollSchedulerCfg;

const ENV_PATH: &str = "RELAY_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/relay.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub feed_url: String,
    pub poll_interval_secs: u64,
    pub first_poll_delay_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Individual notifications per cycle; the rest is summarised.
    pub max_notifications_per_cycle: usize,
    /// Consecutive fetch failures before the outage alert.
    pub fail_alert_threshold: u32,
    /// Also match rules against the item description.
    pub match_body: bool,
    pub database_path: PathBuf,
    pub telegram: TelegramConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat id notifications go to (the bot owner's user id).
    pub recipient: String,
}

/// Backoff and pacing. The attempt count is fixed at `MAX_SEND_ATTEMPTS`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub send_timeout_secs: u64,
    pub spacing_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            poll_interval_secs: 60,
            first_poll_delay_secs: 5,
            fetch_timeout_secs: 30,
            max_notifications_per_cycle: 10,
            fail_alert_threshold: crate::health::DEFAULT_ALERT_THRESHOLD,
            match_body: false,
            database_path: PathBuf::from("data/keywords.db"),
            telegram: TelegramConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            base_delay_ms: p.base_delay.as_millis() as u64,
            max_delay_ms: p.max_delay.as_millis() as u64,
            send_timeout_secs: p.attempt_timeout.as_secs(),
            spacing_ms: 300,
        }
    }
}

impl RelayConfig {
    /// Parse a TOML file. Env overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading relay config from {}", path.display()))?;
        let mut cfg: RelayConfig = toml::from_str(&content)
            .with_context(|| format!("parsing relay config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load config using env var + fallbacks, then apply env overrides:
    /// 1) $RELAY_CONFIG_PATH
    /// 2) config/relay.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_PATH))?
        } else {
            Self::default()
        };
        cfg.apply_env()?;
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_nonempty("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = env_nonempty("ALLOWED_USER_ID") {
            self.telegram.recipient = v;
        }
        if let Some(v) = env_nonempty("RSS_BASE_URL") {
            self.feed_url = v;
        }
        if let Some(v) = env_nonempty("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = env_parsed("POLL_INTERVAL")? {
            self.poll_interval_secs = v;
        }
        if let Some(v) = env_parsed("MAX_NOTIFICATIONS_PER_POLL")? {
            self.max_notifications_per_cycle = v;
        }
        if let Some(v) = env_parsed("RSS_FAIL_ALERT_THRESHOLD")? {
            self.fail_alert_threshold = v;
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        let d = Self::default();
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = d.poll_interval_secs;
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = d.fetch_timeout_secs;
        }
        self.max_notifications_per_cycle = self.max_notifications_per_cycle.max(1);
        self.fail_alert_threshold = self.fail_alert_threshold.max(1);
        if self.delivery.send_timeout_secs == 0 {
            self.delivery.send_timeout_secs = DeliveryConfig::default().send_timeout_secs;
        }
        if self.delivery.max_delay_ms < self.delivery.base_delay_ms {
            self.delivery.max_delay_ms = self.delivery.base_delay_ms;
        }
        if self.feed_url.trim().is_empty() {
            self.feed_url = d.feed_url;
        }
    }

    /// Fails when there is nowhere to deliver to.
    pub fn require_telegram(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(anyhow!("TELEGRAM_BOT_TOKEN is not set"));
        }
        if self.telegram.recipient.trim().is_empty() {
            return Err(anyhow!("ALLOWED_USER_ID is not set"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: MAX_SEND_ATTEMPTS,
            base_delay: Duration::from_millis(self.delivery.base_delay_ms),
            max_delay: Duration::from_millis(self.delivery.max_delay_ms),
            attempt_timeout: Duration::from_secs(self.delivery.send_timeout_secs),
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            dispatch: DispatchSettings {
                recipient: Recipient(self.telegram.recipient.trim().to_string()),
                cap: self.max_notifications_per_cycle,
                retry: self.retry_policy(),
                spacing: Duration::from_millis(self.delivery.spacing_ms),
            },
            alert_threshold: self.fail_alert_threshold,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            match_body: self.match_body,
            source_label: self.feed_url.clone(),
        }
    }

    pub fn scheduler_cfg(&self) -> PollSchedulerCfg {
        PollSchedulerCfg {
            interval: Duration::from_secs(self.poll_interval_secs),
            first_delay: Duration::from_secs(self.first_poll_delay_secs),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_nonempty(key) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{key}={v:?} is not valid: {e}")),
    }
}
