// src/dedup.rs
//! Seen-item ledger bookkeeping around a cycle.
//!
//! - First startup (empty ledger): every fetched item is recorded as delivered and
//!   nothing is sent.
//! - Otherwise only items without a delivered record are eligible for matching.
//! - Items that match nothing are recorded right away, so a rule enabled later never
//!   applies to them.
//! - Matched items are claimed (marked delivered, crediting the first matching rule)
//!   immediately before their notification is sent.

use crate::error::Result;
use crate::matcher::{Hit, MatchEngine};
use crate::model::{FeedItem, ItemId};
use crate::store::RuleStore;

#[derive(Debug)]
pub enum Intake {
    /// The ledger was empty; this many items were silenced.
    FirstRun { silenced: usize },
    /// Items not yet delivered, ordered by id.
    Eligible(Vec<FeedItem>),
}

pub fn intake(store: &dyn RuleStore, items: Vec<FeedItem>) -> Result<Intake> {
    if !store.has_seen_records()? && !items.is_empty() {
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        let silenced = store.mark_seen_silently(&ids)?;
        tracing::info!(target: "dedup", silenced, "first run: seeding ledger without notifying");
        return Ok(Intake::FirstRun { silenced });
    }

    let mut eligible = Vec::with_capacity(items.len());
    for item in items {
        if !store.is_seen(item.id)? {
            eligible.push(item);
        }
    }
    eligible.sort_by_key(|i| i.id);
    eligible.dedup_by_key(|i| i.id);
    Ok(Intake::Eligible(eligible))
}

#[derive(Debug, Default)]
pub struct Classification {
    pub hits: Vec<Hit>,
    pub unmatched: Vec<ItemId>,
}

pub fn classify(engine: &MatchEngine<'_>, eligible: &[FeedItem]) -> Classification {
    let mut out = Classification::default();
    for item in eligible {
        match engine.evaluate(item) {
            Some(hit) => out.hits.push(hit),
            None => out.unmatched.push(item.id),
        }
    }
    out
}

/// Record items that matched nothing this cycle.
pub fn record_unmatched(store: &dyn RuleStore, unmatched: &[ItemId]) -> Result<usize> {
    if unmatched.is_empty() {
        return Ok(0);
    }
    store.mark_seen_silently(unmatched)
}

/// Mark the hits of one notification delivered before it is sent. All or nothing:
/// on error no hit of the unit is marked.
pub fn claim(store: &dyn RuleStore, hits: &[Hit]) -> Result<()> {
    let claims: Vec<_> = hits
        .iter()
        .map(|hit| (hit.item.id, hit.credited().id))
        .collect();
    store.mark_delivered_many(&claims)
}
