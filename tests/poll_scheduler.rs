// tests/poll_scheduler.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keyword_relay::ingest::{FeedQuery, FeedSource};
use keyword_relay::model::FeedItem;
use keyword_relay::notify::{DispatchSettings, Recipient, RetryPolicy, ScriptedChannel};
use keyword_relay::scheduler::{spawn_poll_loop, PollSchedulerCfg};
use keyword_relay::shutdown;
use keyword_relay::status::StatusBoard;
use keyword_relay::{MemoryStore, Relay, RelaySettings};

/// Feed whose fetch outlasts the poll interval and tracks concurrent calls.
#[derive(Default)]
struct SlowFeed {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl FeedSource for SlowFeed {
    async fn fetch_items(&self, _q: &FeedQuery) -> keyword_relay::Result<Vec<FeedItem>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

fn relay(feed: Arc<SlowFeed>) -> Relay {
    Relay::new(
        Arc::new(MemoryStore::new()),
        feed,
        Arc::new(ScriptedChannel::new()),
        RelaySettings {
            dispatch: DispatchSettings {
                recipient: Recipient("1".into()),
                cap: 10,
                retry: RetryPolicy::without_backoff(),
                spacing: Duration::ZERO,
            },
            alert_threshold: 3,
            fetch_timeout: Duration::from_secs(5),
            match_body: false,
            source_label: "slow".into(),
        },
    )
}

#[tokio::test]
async fn cycles_never_overlap_and_loop_stops_on_shutdown() {
    let feed = Arc::new(SlowFeed::default());
    let board = Arc::new(StatusBoard::new());
    let mut events = board.subscribe();
    let (trigger, signal) = shutdown::channel();

    let handle = spawn_poll_loop(
        Arc::new(relay(feed.clone())),
        board.clone(),
        PollSchedulerCfg {
            interval: Duration::from_millis(10),
            first_delay: Duration::ZERO,
        },
        signal,
    );

    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("cycle finished in time")
            .expect("event");
    }
    trigger.trigger();
    let health = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stopped")
        .expect("join");

    assert_eq!(feed.max_active.load(Ordering::SeqCst), 1);
    assert!(feed.calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(health.consecutive_failures, 0);
    assert!(board.snapshot().cycles_run >= 3);
}

#[tokio::test]
async fn shutdown_before_first_tick_runs_nothing() {
    let feed = Arc::new(SlowFeed::default());
    let board = Arc::new(StatusBoard::new());
    let (trigger, signal) = shutdown::channel();

    let handle = spawn_poll_loop(
        Arc::new(relay(feed.clone())),
        board.clone(),
        PollSchedulerCfg {
            interval: Duration::from_secs(60),
            first_delay: Duration::from_secs(60),
        },
        signal,
    );
    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stopped")
        .expect("join");

    assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
    assert_eq!(board.snapshot().cycles_run, 0);
}
