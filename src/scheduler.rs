// src/scheduler.rs
//! Fixed-interval poll loop. Cycles never overlap: a cycle that runs past its
//! interval delays the next tick instead of stacking another one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cycle::Relay;
use crate::health::HealthState;
use crate::shutdown::ShutdownSignal;
use crate::status::StatusBoard;

#[derive(Clone, Copy, Debug)]
pub struct PollSchedulerCfg {
    pub interval: Duration,
    pub first_delay: Duration,
}

pub fn spawn_poll_loop(
    relay: Arc<Relay>,
    board: Arc<StatusBoard>,
    cfg: PollSchedulerCfg,
    shutdown: ShutdownSignal,
) -> JoinHandle<HealthState> {
    tokio::spawn(run_poll_loop(relay, board, cfg, shutdown))
}

/// Returns the health state at exit once shutdown is requested.
pub async fn run_poll_loop(
    relay: Arc<Relay>,
    board: Arc<StatusBoard>,
    cfg: PollSchedulerCfg,
    mut shutdown: ShutdownSignal,
) -> HealthState {
    let period = cfg.interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + cfg.first_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        target: "scheduler",
        interval_secs = period.as_secs_f64(),
        first_delay_secs = cfg.first_delay.as_secs_f64(),
        "poll loop started"
    );

    let mut health = HealthState::default();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            _ = ticker.tick() => {}
        }
        let (next, report) = relay.run_cycle(health, &shutdown).await;
        health = next;
        board.publish(report);
        if shutdown.is_requested() {
            break;
        }
    }

    tracing::info!(target: "scheduler", "poll loop stopped");
    health
}
