// src/model.rs
//! Core records: feed items, keyword rules, seen records and history entries.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RelayError, Result};
use crate::ingest::categories;

/// Stable post identifier taken from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: ItemId,
    pub title: String,
    pub author: String,
    /// Category slug, e.g. "trade". Empty when the feed gave none.
    pub category: String,
    pub link: String,
    /// Unix seconds, 0 when the feed had no parseable date.
    pub published_at: u64,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Substring,
    Regex,
}

impl MatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::Substring => "substring",
            MatchMode::Regex => "regex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" => Some(MatchMode::Substring),
            "regex" => Some(MatchMode::Regex),
            _ => None,
        }
    }
}

/// Category restriction of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "slug")]
pub enum Scope {
    All,
    Category(String),
}

impl Scope {
    /// `None` or an empty string means all categories. Slugs are lowercased and must be
    /// one of the known feed categories.
    pub fn parse(slug: Option<&str>) -> Result<Self> {
        match slug.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(Scope::All),
            Some(s) => {
                let s = s.to_ascii_lowercase();
                if categories::is_known(&s) {
                    Ok(Scope::Category(s))
                } else {
                    Err(RelayError::UnknownCategory(s))
                }
            }
        }
    }

    pub fn slug(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Category(s) => Some(s.as_str()),
        }
    }

    pub fn admits(&self, category: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Category(s) => s == category,
        }
    }
}

/// A keyword pattern that is known to be usable for matching.
///
/// Substring patterns keep a lowercased copy; regex patterns keep the compiled,
/// case-insensitive `Regex`. Construction is the only place a pattern can be rejected.
#[derive(Debug, Clone)]
pub enum Pattern {
    Substring { text: String, folded: String },
    Regex { text: String, re: Regex },
}

impl Pattern {
    pub fn compile(text: &str, mode: MatchMode) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RelayError::InvalidPattern {
                pattern: String::new(),
                reason: "pattern is empty".into(),
            });
        }
        match mode {
            MatchMode::Substring => Ok(Pattern::Substring {
                text: text.to_string(),
                folded: text.to_lowercase(),
            }),
            MatchMode::Regex => {
                let re = RegexBuilder::new(text)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| RelayError::InvalidPattern {
                        pattern: text.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Pattern::Regex {
                    text: text.to_string(),
                    re,
                })
            }
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Pattern::Substring { text, .. } | Pattern::Regex { text, .. } => text,
        }
    }

    pub fn mode(&self) -> MatchMode {
        match self {
            Pattern::Substring { .. } => MatchMode::Substring,
            Pattern::Regex { .. } => MatchMode::Regex,
        }
    }

    /// `folded` must be `haystack.to_lowercase()`; it is passed in so one item is
    /// lowercased once per cycle instead of once per rule.
    pub fn is_match(&self, haystack: &str, folded: &str) -> bool {
        match self {
            Pattern::Substring { folded: needle, .. } => folded.contains(needle.as_str()),
            Pattern::Regex { re, .. } => re.is_match(haystack),
        }
    }
}

/// Input of rule creation, as produced by the command surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub pattern: String,
    pub mode: MatchMode,
    pub scope: Scope,
}

impl RuleDraft {
    pub fn substring(pattern: impl Into<String>, scope: Scope) -> Self {
        Self {
            pattern: pattern.into(),
            mode: MatchMode::Substring,
            scope,
        }
    }

    pub fn regex(pattern: impl Into<String>, scope: Scope) -> Self {
        Self {
            pattern: pattern.into(),
            mode: MatchMode::Regex,
            scope,
        }
    }

    /// Validates the draft. Stores call this before persisting anything.
    pub fn compile(&self) -> Result<Pattern> {
        Pattern::compile(&self.pattern, self.mode)
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub pattern: Pattern,
    pub scope: Scope,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// Label shown in notifications and history.
    pub fn label(&self) -> &str {
        self.pattern.text()
    }
}

/// Listing form of a rule, for the command surface and `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub id: RuleId,
    pub pattern: String,
    pub mode: MatchMode,
    pub scope: Scope,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Rule> for RuleSummary {
    fn from(r: &Rule) -> Self {
        Self {
            id: r.id,
            pattern: r.pattern.text().to_string(),
            mode: r.pattern.mode(),
            scope: r.scope.clone(),
            enabled: r.enabled,
            created_at: r.created_at,
        }
    }
}

/// A persisted rule that could not be restored into a usable [`Rule`].
#[derive(Debug, Clone, Serialize)]
pub struct RuleFault {
    pub rule_id: RuleId,
    pub pattern: String,
    pub reason: String,
}

/// Enabled rules as read at the start of a cycle, in creation order.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub rules: Vec<Rule>,
    pub faults: Vec<RuleFault>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeenRecord {
    pub item_id: ItemId,
    pub delivered: bool,
    /// Rule credited for the notification; `None` for silently classified items.
    pub rule_id: Option<RuleId>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "delivered" {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Failed
        }
    }
}

/// History row before the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub item_id: ItemId,
    pub rule_id: RuleId,
    pub rule_label: String,
    pub title: String,
    pub link: String,
    pub category: String,
    pub outcome: DeliveryOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub seq: i64,
    pub item_id: ItemId,
    pub rule_id: RuleId,
    pub rule_label: String,
    pub title: String,
    pub link: String,
    pub category: String,
    pub outcome: DeliveryOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_new(seq: i64, e: NewHistoryEntry) -> Self {
        Self {
            seq,
            item_id: e.item_id,
            rule_id: e.rule_id,
            rule_label: e.rule_label,
            title: e.title,
            link: e.link,
            category: e.category,
            outcome: e.outcome,
            recorded_at: e.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_regex_is_rejected_at_creation() {
        let draft = RuleDraft::regex("DMIT.*(CN2|GIA", Scope::All);
        match draft.compile() {
            Err(RelayError::InvalidPattern { pattern, .. }) => assert_eq!(pattern, "DMIT.*(CN2|GIA"),
            other => panic!("expected InvalidPattern, got {other:?}"),
        }
    }

    #[test]
    fn empty_pattern_is_rejected_in_both_modes() {
        assert!(RuleDraft::substring("   ", Scope::All).compile().is_err());
        assert!(RuleDraft::regex("", Scope::All).compile().is_err());
    }

    #[test]
    fn scope_parse_lowercases_and_checks_known_slugs() {
        assert_eq!(Scope::parse(None).unwrap(), Scope::All);
        assert_eq!(Scope::parse(Some("")).unwrap(), Scope::All);
        assert_eq!(
            Scope::parse(Some("TRADE")).unwrap(),
            Scope::Category("trade".into())
        );
        assert!(matches!(
            Scope::parse(Some("marketplace")),
            Err(RelayError::UnknownCategory(_))
        ));
    }

    #[test]
    fn scope_admits_exact_slug_only() {
        let s = Scope::Category("trade".into());
        assert!(s.admits("trade"));
        assert!(!s.admits("trade-old"));
        assert!(!s.admits("info"));
        assert!(Scope::All.admits("anything"));
    }
}
