//! Run a single poll cycle against the configured store, feed and chat, then print
//! the cycle report as JSON.

use keyword_relay::{
    build_relay, config::RelayConfig, shutdown::ShutdownSignal, telemetry::init_tracing,
    HealthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = RelayConfig::load_default()?;
    let (_store, relay) = build_relay(&cfg)?;

    let (_, report) = relay
        .run_cycle(HealthState::default(), &ShutdownSignal::never())
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
