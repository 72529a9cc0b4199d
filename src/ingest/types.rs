// src/ingest/types.rs
use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;

use crate::error::{RelayError, Result};
use crate::model::{FeedItem, Rule, Scope};

/// Which feed endpoints a cycle needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedQuery {
    /// The global feed, covering every board.
    Global,
    /// Only these board feeds (sorted, deduplicated).
    Categories(Vec<String>),
}

impl FeedQuery {
    /// The global feed is needed when any rule watches all boards, or when there are
    /// no rules at all (new items still have to be classified as seen).
    pub fn for_rules(rules: &[Rule]) -> Self {
        if rules.is_empty() || rules.iter().any(|r| r.scope == Scope::All) {
            return FeedQuery::Global;
        }
        let slugs: BTreeSet<String> = rules
            .iter()
            .filter_map(|r| r.scope.slug().map(str::to_string))
            .collect();
        FeedQuery::Categories(slugs.into_iter().collect())
    }
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current items. Any error is a `FetchFailure` for the whole cycle.
    async fn fetch_items(&self, query: &FeedQuery) -> Result<Vec<FeedItem>>;
    fn name(&self) -> &'static str;
}

// --- Test helper ---
/// Feed that replays scripted results, then keeps returning its current item list.
pub struct StaticFeed {
    items: Mutex<Vec<FeedItem>>,
    script: Mutex<VecDeque<std::result::Result<Vec<FeedItem>, String>>>,
    pub queries: Mutex<Vec<FeedQuery>>,
}

impl StaticFeed {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items),
            script: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_items(&self, items: Vec<FeedItem>) {
        *self.items.lock().unwrap() = items;
    }

    /// Make the next `n` fetches fail with `reason`.
    pub fn fail_next(&self, n: usize, reason: &str) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..n {
            script.push_back(Err(reason.to_string()));
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for StaticFeed {
    async fn fetch_items(&self, query: &FeedQuery) -> Result<Vec<FeedItem>> {
        self.queries.lock().unwrap().push(query.clone());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next.map_err(RelayError::FetchFailure);
        }
        Ok(self.items.lock().unwrap().clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
