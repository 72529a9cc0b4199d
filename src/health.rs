// src/health.rs
//! Consecutive fetch-failure tracking with a one-shot alert per outage.

use serde::{Deserialize, Serialize};

pub const DEFAULT_ALERT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Feed health carried from one cycle to the next. Lives in memory only, so a
/// restart begins healthy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub consecutive_failures: u32,
    /// Set once the outage alert went out (or was attempted); cleared on recovery.
    pub alert_sent: bool,
}

impl HealthState {
    pub fn status(&self) -> HealthStatus {
        if self.consecutive_failures == 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    /// A successful fetch. Returns the length of the outage that just ended, if any.
    pub fn record_success(&mut self) -> Option<u32> {
        let ended = (self.consecutive_failures > 0).then_some(self.consecutive_failures);
        *self = Self::default();
        ended
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// True exactly once per outage: when the failure count has reached `threshold`
    /// and no alert was sent yet. A zero threshold is treated as 1.
    pub fn should_alert(&self, threshold: u32) -> bool {
        !self.alert_sent && self.consecutive_failures >= threshold.max(1)
    }

    /// Call after the alert attempt, whether or not it was delivered.
    pub fn record_alert(&mut self) {
        self.alert_sent = true;
    }
}
