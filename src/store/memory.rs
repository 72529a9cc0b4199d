// src/store/memory.rs
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{clamp_history_limit, RuleStore};
use crate::error::{RelayError, Result};
use crate::model::{
    HistoryEntry, ItemId, NewHistoryEntry, Rule, RuleDraft, RuleId, RuleSnapshot, RuleSummary,
    SeenRecord,
};

/// Process-local store. Nothing survives a restart; used by tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<Rule>,
    next_rule_id: i64,
    seen: HashMap<ItemId, SeenRecord>,
    history: Vec<HistoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| RelayError::Storage("memory store mutex poisoned".into()))
    }

    /// Insert a ledger record verbatim, e.g. an undelivered one.
    pub fn insert_seen_record(&self, record: SeenRecord) -> Result<()> {
        self.lock()?.seen.insert(record.item_id, record);
        Ok(())
    }

    pub fn seen_count(&self) -> usize {
        self.lock().map(|g| g.seen.len()).unwrap_or(0)
    }
}

fn same_pattern(rule: &Rule, pattern: &str) -> bool {
    rule.pattern.text().to_lowercase() == pattern.trim().to_lowercase()
}

impl RuleStore for MemoryStore {
    fn add_rule(&self, draft: &RuleDraft) -> Result<Rule> {
        let pattern = draft.compile()?;
        let mut g = self.lock()?;
        let duplicate = g.rules.iter().any(|r| {
            same_pattern(r, &draft.pattern)
                && r.pattern.mode() == draft.mode
                && r.scope == draft.scope
        });
        if duplicate {
            return Err(RelayError::DuplicateRule(draft.pattern.trim().to_string()));
        }
        g.next_rule_id += 1;
        let rule = Rule {
            id: RuleId(g.next_rule_id),
            pattern,
            scope: draft.scope.clone(),
            enabled: true,
            created_at: Utc::now(),
        };
        g.rules.push(rule.clone());
        Ok(rule)
    }

    fn remove_rule(&self, pattern: &str) -> Result<usize> {
        let mut g = self.lock()?;
        let before = g.rules.len();
        g.rules.retain(|r| !same_pattern(r, pattern));
        Ok(before - g.rules.len())
    }

    fn set_rule_enabled(&self, pattern: &str, enabled: bool) -> Result<usize> {
        let mut g = self.lock()?;
        let mut n = 0;
        for r in g.rules.iter_mut().filter(|r| same_pattern(r, pattern)) {
            r.enabled = enabled;
            n += 1;
        }
        Ok(n)
    }

    fn list_rules(&self) -> Result<Vec<RuleSummary>> {
        Ok(self.lock()?.rules.iter().map(RuleSummary::from).collect())
    }

    fn list_enabled_rules(&self) -> Result<RuleSnapshot> {
        let g = self.lock()?;
        Ok(RuleSnapshot {
            rules: g.rules.iter().filter(|r| r.enabled).cloned().collect(),
            faults: Vec::new(),
        })
    }

    fn has_seen_records(&self) -> Result<bool> {
        Ok(!self.lock()?.seen.is_empty())
    }

    fn is_seen(&self, item: ItemId) -> Result<bool> {
        Ok(self.lock()?.seen.get(&item).is_some_and(|r| r.delivered))
    }

    fn seen_record(&self, item: ItemId) -> Result<Option<SeenRecord>> {
        Ok(self.lock()?.seen.get(&item).cloned())
    }

    fn mark_delivered(&self, item: ItemId, rule: RuleId) -> Result<()> {
        let mut g = self.lock()?;
        let rec = g.seen.entry(item).or_insert_with(|| SeenRecord {
            item_id: item,
            delivered: false,
            rule_id: None,
            seen_at: Utc::now(),
        });
        if !rec.delivered {
            rec.delivered = true;
            rec.rule_id = Some(rule);
        }
        Ok(())
    }

    fn mark_delivered_many(&self, claims: &[(ItemId, RuleId)]) -> Result<()> {
        let mut g = self.lock()?;
        let now = Utc::now();
        for &(item, rule) in claims {
            let rec = g.seen.entry(item).or_insert_with(|| SeenRecord {
                item_id: item,
                delivered: false,
                rule_id: None,
                seen_at: now,
            });
            if !rec.delivered {
                rec.delivered = true;
                rec.rule_id = Some(rule);
            }
        }
        Ok(())
    }

    fn mark_seen_silently(&self, items: &[ItemId]) -> Result<usize> {
        let mut g = self.lock()?;
        let now = Utc::now();
        let mut changed = 0;
        for &item in items {
            let rec = g.seen.entry(item).or_insert_with(|| SeenRecord {
                item_id: item,
                delivered: false,
                rule_id: None,
                seen_at: now,
            });
            if !rec.delivered {
                rec.delivered = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let mut g = self.lock()?;
        let seq = g.history.len() as i64 + 1;
        let row = HistoryEntry::from_new(seq, entry);
        g.history.push(row.clone());
        Ok(row)
    }

    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let g = self.lock()?;
        Ok(g.history
            .iter()
            .rev()
            .take(clamp_history_limit(limit))
            .cloned()
            .collect())
    }
}
