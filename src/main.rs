//! Keyword relay service entrypoint.
//! Starts the poll loop in the background and serves the status API.

use std::sync::Arc;

use keyword_relay::{
    api::{create_router, AppState},
    build_relay,
    config::RelayConfig,
    metrics::Metrics,
    scheduler::spawn_poll_loop,
    shutdown,
    status::StatusBoard,
    telemetry::init_tracing,
};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = RelayConfig::load_default()?;
    let metrics = Metrics::init(cfg.poll_interval_secs)?;
    let (store, relay) = build_relay(&cfg)?;

    let board = Arc::new(StatusBoard::new());
    let (trigger, signal) = shutdown::channel();
    spawn_poll_loop(Arc::new(relay), board.clone(), cfg.scheduler_cfg(), signal);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, stopping poll loop");
            trigger.trigger();
        }
    });

    tracing::info!(
        feed = %cfg.feed_url,
        db = %cfg.database_path.display(),
        interval_secs = cfg.poll_interval_secs,
        "keyword relay started"
    );

    let router = create_router(AppState::new(store, board)).merge(metrics.router());
    Ok(router.into())
}
