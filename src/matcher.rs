// src/matcher.rs
//! Keyword match engine.
//!
//! Every enabled rule is evaluated independently against an item's title (and its
//! body, when body matching is on). Rules come pre-compiled from the store, so
//! evaluation itself cannot fail; rules that could not be restored were already
//! split off into the snapshot's fault list.

use serde::Serialize;

use crate::model::{FeedItem, Rule, RuleId};

/// A rule that matched, reduced to what dispatch and history need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub id: RuleId,
    pub label: String,
}

/// An item together with every rule it matched, in rule creation order.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub item: FeedItem,
    pub rules: Vec<MatchedRule>,
}

impl Hit {
    /// The rule credited in the ledger and in history: the first one evaluated.
    pub fn credited(&self) -> &MatchedRule {
        &self.rules[0]
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.label.as_str())
    }
}

pub struct MatchEngine<'r> {
    rules: &'r [Rule],
    match_body: bool,
}

impl<'r> MatchEngine<'r> {
    /// `rules` must be in creation order; that order decides which rule is credited.
    pub fn new(rules: &'r [Rule], match_body: bool) -> Self {
        Self { rules, match_body }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }

    /// Ordered list of rules matching `item`; empty when nothing matches.
    pub fn matching_rules(&self, item: &FeedItem) -> Vec<&'r Rule> {
        let haystack = match (&item.body, self.match_body) {
            (Some(body), true) => format!("{}\n{}", item.title, body),
            _ => item.title.clone(),
        };
        let folded = haystack.to_lowercase();

        self.rules
            .iter()
            .filter(|r| r.enabled)
            .filter(|r| r.scope.admits(&item.category))
            .filter(|r| r.pattern.is_match(&haystack, &folded))
            .collect()
    }

    /// `None` when the item matched no rule.
    pub fn evaluate(&self, item: &FeedItem) -> Option<Hit> {
        let rules: Vec<MatchedRule> = self
            .matching_rules(item)
            .into_iter()
            .map(|r| MatchedRule {
                id: r.id,
                label: r.label().to_string(),
            })
            .collect();
        (!rules.is_empty()).then(|| Hit {
            item: item.clone(),
            rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemId, Pattern, MatchMode, Scope};
    use chrono::Utc;

    fn rule(id: i64, pat: &str, mode: MatchMode, scope: Scope) -> Rule {
        Rule {
            id: RuleId(id),
            pattern: Pattern::compile(pat, mode).unwrap(),
            scope,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    fn item(title: &str, category: &str) -> FeedItem {
        FeedItem {
            id: ItemId(1),
            title: title.into(),
            author: "a".into(),
            category: category.into(),
            link: "https://www.nodeseek.com/post-1-1".into(),
            published_at: 0,
            body: None,
        }
    }

    #[test]
    fn substring_is_case_insensitive() {
        let rules = vec![rule(1, "dmit", MatchMode::Substring, Scope::All)];
        let eng = MatchEngine::new(&rules, false);
        assert_eq!(eng.matching_rules(&item("出 DMIT LAX 年付", "trade")).len(), 1);
        assert!(eng.matching_rules(&item("出 BWG", "trade")).is_empty());
    }

    #[test]
    fn regex_is_case_insensitive_search() {
        let rules = vec![rule(1, "DMIT.*(CN2|GIA)", MatchMode::Regex, Scope::All)];
        let eng = MatchEngine::new(&rules, false);
        assert!(eng.evaluate(&item("收 dmit lax gia 季付", "trade")).is_some());
        assert!(eng.evaluate(&item("收 dmit lax 季付", "trade")).is_none());
    }

    #[test]
    fn scope_restricts_to_exact_category() {
        let rules = vec![
            rule(1, "vps", MatchMode::Substring, Scope::Category("trade".into())),
            rule(2, "vps", MatchMode::Regex, Scope::All),
        ];
        let eng = MatchEngine::new(&rules, false);
        let hit = eng.evaluate(&item("cheap VPS", "info")).unwrap();
        assert_eq!(hit.rules.len(), 1);
        assert_eq!(hit.credited().id, RuleId(2));
    }

    #[test]
    fn several_rules_in_creation_order_and_first_is_credited() {
        let rules = vec![
            rule(3, "cn2", MatchMode::Substring, Scope::All),
            rule(5, "gia", MatchMode::Substring, Scope::All),
            rule(9, "nope", MatchMode::Substring, Scope::All),
        ];
        let eng = MatchEngine::new(&rules, false);
        let hit = eng.evaluate(&item("CN2 GIA 线路", "daily")).unwrap();
        assert_eq!(hit.labels().collect::<Vec<_>>(), vec!["cn2", "gia"]);
        assert_eq!(hit.credited().id, RuleId(3));
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut r = rule(1, "dmit", MatchMode::Substring, Scope::All);
        r.enabled = false;
        let rules = vec![r];
        let eng = MatchEngine::new(&rules, false);
        assert_eq!(eng.rule_count(), 0);
        assert!(eng.evaluate(&item("DMIT", "trade")).is_none());
    }

    #[test]
    fn body_only_counts_when_enabled() {
        let rules = vec![rule(1, "tokyo", MatchMode::Substring, Scope::All)];
        let mut it = item("新机到货", "info");
        it.body = Some("Located in Tokyo".into());
        assert!(MatchEngine::new(&rules, false).evaluate(&it).is_none());
        assert!(MatchEngine::new(&rules, true).evaluate(&it).is_some());
    }
}
