// src/telemetry.rs
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Relay log lines use these explicit targets rather than module paths.
const DEFAULT_FILTER: &str =
    "cycle=info,dispatch=info,notify=info,scheduler=info,dedup=info,ingest=info,keyword_relay=info,warn";

pub fn default_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter and
/// `RELAY_LOG_JSON=1` switches to JSON lines. A no-op when a subscriber is already
/// installed (the Shuttle runtime sets one up itself).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let json = std::env::var("RELAY_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};

    struct CountEvents(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for CountEvents {
        fn on_event(&self, _event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_filter_shows_info_from_relay_targets() {
        let seen = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry()
            .with(default_filter())
            .with(CountEvents(seen.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "cycle", "cycle finished");
            tracing::info!(target: "dispatch", "notification processed");
            tracing::info!(target: "notify", "sent");
            tracing::info!(target: "scheduler", "poll loop started");
            tracing::info!(target: "dedup", "first run");
            tracing::info!(target: "ingest", "fetched");
            tracing::debug!(target: "cycle", "too chatty");
            tracing::info!(target: "hyper", "dependency noise");
            tracing::warn!(target: "hyper", "dependency warning");
        });

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
