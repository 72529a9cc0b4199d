// src/store/mod.rs
//! Rule store: keyword rules, the seen-item ledger and notification history.
//!
//! The relay core only reads rules and writes ledger/history rows; rule CRUD is
//! exposed for the command surface. Implementations serialise access internally, so
//! a store can be shared between the poll worker and other tasks behind an `Arc`.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{
    HistoryEntry, ItemId, NewHistoryEntry, Rule, RuleDraft, RuleId, RuleSnapshot, RuleSummary,
    SeenRecord,
};

/// Upper bound for `recent_history`.
pub const MAX_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

pub trait RuleStore: Send + Sync {
    /// Validate and persist a rule. Fails with `InvalidPattern` or `DuplicateRule`.
    fn add_rule(&self, draft: &RuleDraft) -> Result<Rule>;

    /// Delete every rule whose pattern equals `pattern` (case-insensitive).
    fn remove_rule(&self, pattern: &str) -> Result<usize>;

    /// Toggle every rule whose pattern equals `pattern` (case-insensitive).
    fn set_rule_enabled(&self, pattern: &str, enabled: bool) -> Result<usize>;

    /// All rules, enabled or not, in creation order.
    fn list_rules(&self) -> Result<Vec<RuleSummary>>;

    /// Enabled rules in creation order, read as one consistent snapshot.
    fn list_enabled_rules(&self) -> Result<RuleSnapshot>;

    /// Whether the ledger holds any record at all (false on first startup).
    fn has_seen_records(&self) -> Result<bool>;

    /// True when the item has a record with `delivered = true`.
    fn is_seen(&self, item: ItemId) -> Result<bool>;

    fn seen_record(&self, item: ItemId) -> Result<Option<SeenRecord>>;

    /// Mark an item delivered and credit `rule`. A record that is already delivered
    /// keeps its original credit.
    fn mark_delivered(&self, item: ItemId, rule: RuleId) -> Result<()>;

    /// `mark_delivered` for a whole notification unit. Either every item is marked
    /// or, on error, none is.
    fn mark_delivered_many(&self, claims: &[(ItemId, RuleId)]) -> Result<()>;

    /// Mark items delivered without a credited rule. Returns how many changed.
    fn mark_seen_silently(&self, items: &[ItemId]) -> Result<usize>;

    fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry>;

    /// Newest first; `limit` is clamped to `1..=MAX_HISTORY_LIMIT`.
    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>>;
}

pub fn clamp_history_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_HISTORY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_is_clamped() {
        assert_eq!(clamp_history_limit(0), 1);
        assert_eq!(clamp_history_limit(7), 7);
        assert_eq!(clamp_history_limit(500), MAX_HISTORY_LIMIT);
    }
}
