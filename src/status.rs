// src/status.rs
//! Latest cycle outcome, shared with the HTTP surface.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cycle::CycleReport;
use crate::health::{HealthState, HealthStatus};

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub started_at: DateTime<Utc>,
    pub cycles_run: u64,
    pub health: HealthState,
    pub health_status: HealthStatus,
    pub last_cycle: Option<CycleReport>,
}

pub struct StatusBoard {
    inner: RwLock<StatusSnapshot>,
    events: broadcast::Sender<CycleReport>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: RwLock::new(StatusSnapshot {
                started_at: Utc::now(),
                cycles_run: 0,
                health: HealthState::default(),
                health_status: HealthStatus::Healthy,
                last_cycle: None,
            }),
            events,
        }
    }

    pub fn publish(&self, report: CycleReport) {
        {
            let mut s = self.inner.write().unwrap_or_else(|p| p.into_inner());
            s.cycles_run += 1;
            s.health = report.health;
            s.health_status = report.health_status;
            s.last_cycle = Some(report.clone());
        }
        // Nobody listening is fine.
        let _ = self.events.send(report);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Cycle-completion events, one per finished cycle.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.events.subscribe()
    }
}
