// src/notify/dispatch.rs
//! Flood-capped delivery of one cycle's hits.
//!
//! The first `cap` hits (in item order) become individual notifications; anything
//! above the cap is folded into a single summary message. Each notification unit is
//! claimed in the ledger right before it is sent, so a crash mid-dispatch can lose a
//! notification but never repeat one. Shutdown is honoured between units.

use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;

use super::{format, send_with_retry, MessageChannel, Recipient, RetryPolicy, SendOutcome};
use crate::dedup;
use crate::matcher::Hit;
use crate::model::{DeliveryOutcome, NewHistoryEntry};
use crate::shutdown::ShutdownSignal;
use crate::store::RuleStore;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub recipient: Recipient,
    /// Individual notifications per cycle; further hits go into the summary.
    pub cap: usize,
    pub retry: RetryPolicy,
    /// Pause between consecutive sends.
    pub spacing: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Individual notifications delivered.
    pub sent: usize,
    /// Individual notifications that exhausted their retries.
    pub failed: usize,
    /// Hits carried by the summary message (0 when there was none).
    pub summarized: usize,
    pub summary: Option<DeliveryOutcome>,
    /// Hits left untouched (shutdown or ledger error); still eligible next cycle.
    pub deferred: usize,
    pub history_errors: usize,
}

enum Unit {
    Single(Hit),
    Summary(Vec<Hit>),
}

impl Unit {
    fn hits(&self) -> &[Hit] {
        match self {
            Unit::Single(h) => std::slice::from_ref(h),
            Unit::Summary(hs) => hs,
        }
    }

    fn text(&self, matched: usize, sent: usize) -> String {
        match self {
            Unit::Single(h) => format::notification(h),
            Unit::Summary(hs) => format::summary(hs, matched, sent),
        }
    }
}

/// Split hits into the individually notified head and the summarized overflow.
pub fn partition(mut hits: Vec<Hit>, cap: usize) -> (Vec<Hit>, Vec<Hit>) {
    let overflow = hits.split_off(cap.min(hits.len()));
    (hits, overflow)
}

pub struct Dispatcher<'a> {
    store: &'a dyn RuleStore,
    channel: &'a dyn MessageChannel,
    settings: &'a DispatchSettings,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a dyn RuleStore,
        channel: &'a dyn MessageChannel,
        settings: &'a DispatchSettings,
    ) -> Self {
        Self {
            store,
            channel,
            settings,
        }
    }

    pub async fn dispatch(&self, hits: Vec<Hit>, shutdown: &ShutdownSignal) -> DispatchReport {
        let mut report = DispatchReport::default();
        if hits.is_empty() {
            return report;
        }

        let matched = hits.len();
        let (head, overflow) = partition(hits, self.settings.cap);
        let mut units: Vec<Unit> = head.into_iter().map(Unit::Single).collect();
        if !overflow.is_empty() {
            units.push(Unit::Summary(overflow));
        }

        let total = units.len();
        for (idx, unit) in units.into_iter().enumerate() {
            if shutdown.is_requested() {
                report.deferred += unit.hits().len();
                continue;
            }
            if idx > 0 && !self.settings.spacing.is_zero() {
                tokio::time::sleep(self.settings.spacing).await;
            }

            if let Err(e) = dedup::claim(self.store, unit.hits()) {
                tracing::error!(target: "dispatch", error = %e, "could not claim items, leaving them for next cycle");
                report.deferred += unit.hits().len();
                continue;
            }

            let outcome = send_with_retry(
                self.channel,
                &self.settings.recipient,
                &unit.text(matched, report.sent),
                &self.settings.retry,
            )
            .await;
            let delivery = match &outcome {
                SendOutcome::Delivered { .. } => DeliveryOutcome::Delivered,
                SendOutcome::Failed { .. } => DeliveryOutcome::Failed,
            };

            match (&unit, delivery) {
                (Unit::Single(_), DeliveryOutcome::Delivered) => report.sent += 1,
                (Unit::Single(_), DeliveryOutcome::Failed) => report.failed += 1,
                (Unit::Summary(hs), d) => {
                    report.summarized = hs.len();
                    report.summary = Some(d);
                }
            }
            match delivery {
                DeliveryOutcome::Delivered => {
                    counter!("relay_notifications_sent_total").increment(1)
                }
                DeliveryOutcome::Failed => {
                    counter!("relay_notifications_failed_total").increment(1)
                }
            }
            tracing::info!(
                target: "dispatch",
                unit = idx + 1,
                of = total,
                items = unit.hits().len(),
                attempts = outcome.attempts(),
                outcome = delivery.as_str(),
                "notification processed"
            );

            report.history_errors += self.record_history(unit.hits(), delivery);
        }

        if report.deferred > 0 {
            tracing::warn!(target: "dispatch", deferred = report.deferred, "dispatch stopped early");
        }
        report
    }

    /// One entry per hit; returns how many appends failed.
    fn record_history(&self, hits: &[Hit], outcome: DeliveryOutcome) -> usize {
        let mut errors = 0;
        for hit in hits {
            let credited = hit.credited();
            let entry = NewHistoryEntry {
                item_id: hit.item.id,
                rule_id: credited.id,
                rule_label: credited.label.clone(),
                title: hit.item.title.clone(),
                link: hit.item.link.clone(),
                category: hit.item.category.clone(),
                outcome,
                recorded_at: Utc::now(),
            };
            if let Err(e) = self.store.append_history(entry) {
                tracing::error!(target: "dispatch", item = %hit.item.id, error = %e, "history append failed");
                errors += 1;
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchedRule;
    use crate::model::{FeedItem, ItemId, RuleDraft, RuleId, Scope};
    use crate::notify::ScriptedChannel;
    use crate::store::MemoryStore;

    fn hit(id: u64, rule: RuleId) -> Hit {
        Hit {
            item: FeedItem {
                id: ItemId(id),
                title: format!("DMIT #{id}"),
                author: "bob".into(),
                category: "trade".into(),
                link: format!("https://www.nodeseek.com/post-{id}-1"),
                published_at: 0,
                body: None,
            },
            rules: vec![MatchedRule {
                id: rule,
                label: "dmit".into(),
            }],
        }
    }

    fn settings(cap: usize) -> DispatchSettings {
        DispatchSettings {
            recipient: Recipient("1".into()),
            cap,
            retry: RetryPolicy::without_backoff(),
            spacing: Duration::ZERO,
        }
    }

    #[test]
    fn partition_keeps_order() {
        let hits: Vec<Hit> = (1..=5).map(|i| hit(i, RuleId(1))).collect();
        let (head, rest) = partition(hits, 3);
        assert_eq!(head.iter().map(|h| h.item.id.0).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rest.iter().map(|h| h.item.id.0).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn overflow_goes_into_one_summary() {
        let store = MemoryStore::new();
        let rule = store.add_rule(&RuleDraft::substring("dmit", Scope::All)).unwrap();
        let ch = ScriptedChannel::new();
        let s = settings(10);
        let hits = (1..=15).map(|i| hit(i, rule.id)).collect();

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch(hits, &ShutdownSignal::never())
            .await;

        assert_eq!(report.sent, 10);
        assert_eq!(report.summarized, 5);
        assert_eq!(report.summary, Some(DeliveryOutcome::Delivered));
        assert_eq!(ch.delivered().len(), 11);
        assert!((1..=15).all(|i| store.is_seen(ItemId(i)).unwrap()));
        assert_eq!(store.recent_history(20).unwrap().len(), 15);
    }

    #[tokio::test]
    async fn failed_send_is_recorded_and_never_retried_later() {
        let store = MemoryStore::new();
        let rule = store.add_rule(&RuleDraft::substring("dmit", Scope::All)).unwrap();
        let ch = ScriptedChannel::new();
        ch.set_always_fail(true);
        let s = settings(10);

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch(vec![hit(1, rule.id)], &ShutdownSignal::never())
            .await;

        assert_eq!(report.failed, 1);
        assert!(store.is_seen(ItemId(1)).unwrap());
        let h = store.recent_history(1).unwrap();
        assert_eq!(h[0].outcome, DeliveryOutcome::Failed);
    }

    #[tokio::test]
    async fn shutdown_defers_everything_unclaimed() {
        let store = MemoryStore::new();
        let rule = store.add_rule(&RuleDraft::substring("dmit", Scope::All)).unwrap();
        let ch = ScriptedChannel::new();
        let s = settings(2);
        let (trigger, signal) = crate::shutdown::channel();
        trigger.trigger();

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch((1..=4).map(|i| hit(i, rule.id)).collect(), &signal)
            .await;

        assert_eq!(report.deferred, 4);
        assert_eq!(ch.attempt_count(), 0);
        assert!(!store.is_seen(ItemId(1)).unwrap());
    }

    /// Delivers through a `ScriptedChannel` and requests shutdown once `after`
    /// messages have gone out.
    struct StopAfter {
        inner: ScriptedChannel,
        after: usize,
        trigger: crate::shutdown::ShutdownTrigger,
    }

    #[async_trait::async_trait]
    impl MessageChannel for StopAfter {
        async fn send(&self, recipient: &Recipient, text: &str) -> crate::Result<crate::notify::Ack> {
            let res = self.inner.send(recipient, text).await;
            if self.inner.attempt_count() >= self.after {
                self.trigger.trigger();
            }
            res
        }

        fn name(&self) -> &'static str {
            "stop-after"
        }
    }

    #[tokio::test]
    async fn shutdown_mid_dispatch_keeps_sent_units_and_leaves_the_rest_eligible() {
        let store = MemoryStore::new();
        let rule = store.add_rule(&RuleDraft::substring("dmit", Scope::All)).unwrap();
        let (trigger, signal) = crate::shutdown::channel();
        let ch = StopAfter {
            inner: ScriptedChannel::new(),
            after: 3,
            trigger,
        };
        let s = settings(10);

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch((1..=6).map(|i| hit(i, rule.id)).collect(), &signal)
            .await;

        assert_eq!(report.sent, 3);
        assert_eq!(report.deferred, 3);
        assert_eq!(ch.inner.attempt_count(), 3);
        assert!((1..=3).all(|i| store.is_seen(ItemId(i)).unwrap()));
        assert!((4..=6).all(|i| !store.is_seen(ItemId(i)).unwrap()));
        let ids: Vec<u64> = store
            .recent_history(20)
            .unwrap()
            .iter()
            .map(|h| h.item_id.0)
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn shutdown_before_summary_defers_the_overflow() {
        let store = MemoryStore::new();
        let rule = store.add_rule(&RuleDraft::substring("dmit", Scope::All)).unwrap();
        let (trigger, signal) = crate::shutdown::channel();
        let ch = StopAfter {
            inner: ScriptedChannel::new(),
            after: 2,
            trigger,
        };
        let s = settings(2);

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch((1..=5).map(|i| hit(i, rule.id)).collect(), &signal)
            .await;

        assert_eq!(report.sent, 2);
        assert_eq!(report.summary, None);
        assert_eq!(report.summarized, 0);
        assert_eq!(report.deferred, 3);
        assert!((3..=5).all(|i| !store.is_seen(ItemId(i)).unwrap()));
        assert_eq!(store.recent_history(20).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exactly_cap_hits_send_no_summary() {
        let store = MemoryStore::new();
        let rule = store.add_rule(&RuleDraft::substring("dmit", Scope::All)).unwrap();
        let ch = ScriptedChannel::new();
        let s = settings(3);

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch((1..=3).map(|i| hit(i, rule.id)).collect(), &ShutdownSignal::never())
            .await;

        assert_eq!(report.sent, 3);
        assert_eq!(report.summary, None);
        assert_eq!(report.summarized, 0);
        assert_eq!(ch.delivered().len(), 3);
        assert!(ch.delivered().iter().all(|t| !t.starts_with("📦")));
    }

    #[tokio::test]
    async fn one_over_cap_sends_a_single_item_summary() {
        let store = MemoryStore::new();
        let rule = store.add_rule(&RuleDraft::substring("dmit", Scope::All)).unwrap();
        let ch = ScriptedChannel::new();
        let s = settings(3);

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch((1..=4).map(|i| hit(i, rule.id)).collect(), &ShutdownSignal::never())
            .await;

        assert_eq!(report.sent, 3);
        assert_eq!(report.summarized, 1);
        assert_eq!(report.summary, Some(DeliveryOutcome::Delivered));
        let texts = ch.delivered();
        assert_eq!(texts.len(), 4);
        assert!(texts[3].starts_with("📦 <b>4 matches this round</b>"));
        assert_eq!(texts[3].matches("• ").count(), 1);
        assert!(texts[3].contains("post-4-1"));
    }

    #[tokio::test]
    async fn failed_claim_leaves_whole_unit_unmarked_and_unsent() {
        let store = crate::store::SqliteStore::open_in_memory().unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER reject_12 BEFORE INSERT ON seen_items WHEN NEW.item_id = 12
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let ch = ScriptedChannel::new();
        let s = settings(10);

        let report = Dispatcher::new(&store, &ch, &s)
            .dispatch((1..=15).map(|i| hit(i, RuleId(1))).collect(), &ShutdownSignal::never())
            .await;

        assert_eq!(report.sent, 10);
        assert_eq!(report.deferred, 5);
        assert_eq!(report.summary, None);
        assert_eq!(ch.attempt_count(), 10);
        assert!((11..=15).all(|i| store.seen_record(ItemId(i)).unwrap().is_none()));
        let history = store.recent_history(20).unwrap();
        assert_eq!(history.len(), 10);
        assert!(history.iter().all(|h| h.item_id.0 <= 10));
    }
}
