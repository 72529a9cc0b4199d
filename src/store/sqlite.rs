// src/store/sqlite.rs
//! SQLite-backed rule store. One connection behind a mutex; WAL for file databases so
//! readers outside the relay are not blocked.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{clamp_history_limit, RuleStore};
use crate::error::{RelayError, Result};
use crate::model::{
    DeliveryOutcome, HistoryEntry, ItemId, MatchMode, NewHistoryEntry, Pattern, Rule, RuleDraft,
    RuleFault, RuleId, RuleSnapshot, RuleSummary, Scope, SeenRecord,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| RelayError::Storage(format!("creating {}: {e}", dir.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RelayError::Storage("sqlite connection mutex poisoned".into()))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rules (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern        TEXT NOT NULL,
                pattern_folded TEXT NOT NULL,
                mode           TEXT NOT NULL DEFAULT 'substring',
                scope          TEXT NOT NULL DEFAULT '',   -- '' = all categories
                enabled        INTEGER NOT NULL DEFAULT 1,
                created_at     TEXT NOT NULL,
                UNIQUE(pattern_folded, mode, scope)
            );

            CREATE TABLE IF NOT EXISTS seen_items (
                item_id   INTEGER PRIMARY KEY,
                delivered INTEGER NOT NULL DEFAULT 0,
                rule_id   INTEGER,
                seen_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id     INTEGER NOT NULL,
                rule_id     INTEGER NOT NULL,
                rule_label  TEXT NOT NULL,
                title       TEXT NOT NULL,
                link        TEXT NOT NULL,
                category    TEXT NOT NULL,
                outcome     TEXT NOT NULL,   -- 'delivered' | 'failed'
                recorded_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Run raw SQL against the database. Used to simulate rows written by older
    /// versions or by hand.
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

/// SQLite integers are signed; ids past `i64::MAX` are refused instead of wrapping.
fn item_key(item: ItemId) -> Result<i64> {
    i64::try_from(item.0)
        .map_err(|_| RelayError::Storage(format!("item id {item} does not fit in an SQLite integer")))
}

fn scope_column(scope: &Scope) -> &str {
    scope.slug().unwrap_or("")
}

fn scope_from_column(s: &str) -> Scope {
    if s.is_empty() {
        Scope::All
    } else {
        Scope::Category(s.to_string())
    }
}

struct RuleRow {
    id: i64,
    pattern: String,
    mode: String,
    scope: String,
    enabled: bool,
    created_at: String,
}

impl RuleRow {
    const COLUMNS: &'static str = "id, pattern, mode, scope, enabled, created_at";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pattern: row.get(1)?,
            mode: row.get(2)?,
            scope: row.get(3)?,
            enabled: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
        })
    }

    /// Rebuild the compiled rule. A row that no longer compiles is an internal
    /// consistency fault: it passed validation when it was written.
    fn restore(self) -> std::result::Result<Rule, RuleFault> {
        let fault = |reason: String| RuleFault {
            rule_id: RuleId(self.id),
            pattern: self.pattern.clone(),
            reason,
        };
        let mode = MatchMode::parse(&self.mode)
            .ok_or_else(|| fault(format!("unknown match mode `{}`", self.mode)))?;
        let pattern = Pattern::compile(&self.pattern, mode).map_err(|e| {
            fault(
                RelayError::InternalConsistency {
                    rule_id: self.id,
                    reason: e.to_string(),
                }
                .to_string(),
            )
        })?;
        Ok(Rule {
            id: RuleId(self.id),
            pattern,
            scope: scope_from_column(&self.scope),
            enabled: self.enabled,
            created_at: parse_ts(&self.created_at),
        })
    }

    fn summary(self) -> RuleSummary {
        RuleSummary {
            id: RuleId(self.id),
            mode: MatchMode::parse(&self.mode).unwrap_or_default(),
            scope: scope_from_column(&self.scope),
            enabled: self.enabled,
            created_at: parse_ts(&self.created_at),
            pattern: self.pattern,
        }
    }
}

fn item_from_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ItemId> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw)
        .map(ItemId)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, raw))
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let outcome: String = row.get(7)?;
    let recorded_at: String = row.get(8)?;
    Ok(HistoryEntry {
        seq: row.get(0)?,
        item_id: item_from_column(row, 1)?,
        rule_id: RuleId(row.get(2)?),
        rule_label: row.get(3)?,
        title: row.get(4)?,
        link: row.get(5)?,
        category: row.get(6)?,
        outcome: DeliveryOutcome::parse(&outcome),
        recorded_at: parse_ts(&recorded_at),
    })
}

impl RuleStore for SqliteStore {
    fn add_rule(&self, draft: &RuleDraft) -> Result<Rule> {
        let pattern = draft.compile()?;
        let text = pattern.text().to_string();
        let created_at = Utc::now();
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO rules (pattern, pattern_folded, mode, scope, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                text,
                text.to_lowercase(),
                draft.mode.as_str(),
                scope_column(&draft.scope),
                created_at.to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            return Err(RelayError::DuplicateRule(text));
        }
        Ok(Rule {
            id: RuleId(conn.last_insert_rowid()),
            pattern,
            scope: draft.scope.clone(),
            enabled: true,
            created_at,
        })
    }

    fn remove_rule(&self, pattern: &str) -> Result<usize> {
        let n = self.lock()?.execute(
            "DELETE FROM rules WHERE pattern_folded = ?1",
            params![pattern.trim().to_lowercase()],
        )?;
        Ok(n)
    }

    fn set_rule_enabled(&self, pattern: &str, enabled: bool) -> Result<usize> {
        let n = self.lock()?.execute(
            "UPDATE rules SET enabled = ?1 WHERE pattern_folded = ?2",
            params![enabled as i64, pattern.trim().to_lowercase()],
        )?;
        Ok(n)
    }

    fn list_rules(&self) -> Result<Vec<RuleSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rules ORDER BY id",
            RuleRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map([], RuleRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(RuleRow::summary).collect())
    }

    fn list_enabled_rules(&self) -> Result<RuleSnapshot> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM rules WHERE enabled = 1 ORDER BY id",
                RuleRow::COLUMNS
            ))?;
            let rows = stmt
                .query_map([], RuleRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut snapshot = RuleSnapshot::default();
        for row in rows {
            match row.restore() {
                Ok(rule) => snapshot.rules.push(rule),
                Err(fault) => snapshot.faults.push(fault),
            }
        }
        Ok(snapshot)
    }

    fn has_seen_records(&self) -> Result<bool> {
        let any: Option<i64> = self
            .lock()?
            .query_row("SELECT 1 FROM seen_items LIMIT 1", [], |r| r.get(0))
            .optional()?;
        Ok(any.is_some())
    }

    fn is_seen(&self, item: ItemId) -> Result<bool> {
        let key = item_key(item)?;
        let delivered: Option<i64> = self
            .lock()?
            .query_row(
                "SELECT delivered FROM seen_items WHERE item_id = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(delivered.is_some_and(|d| d != 0))
    }

    fn seen_record(&self, item: ItemId) -> Result<Option<SeenRecord>> {
        let key = item_key(item)?;
        let rec = self
            .lock()?
            .query_row(
                "SELECT delivered, rule_id, seen_at FROM seen_items WHERE item_id = ?1",
                params![key],
                |r| {
                    let seen_at: String = r.get(2)?;
                    Ok(SeenRecord {
                        item_id: item,
                        delivered: r.get::<_, i64>(0)? != 0,
                        rule_id: r.get::<_, Option<i64>>(1)?.map(RuleId),
                        seen_at: parse_ts(&seen_at),
                    })
                },
            )
            .optional()?;
        Ok(rec)
    }

    fn mark_delivered(&self, item: ItemId, rule: RuleId) -> Result<()> {
        self.mark_delivered_many(&[(item, rule)])
    }

    fn mark_delivered_many(&self, claims: &[(ItemId, RuleId)]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO seen_items (item_id, delivered, rule_id, seen_at) VALUES (?1, 1, ?2, ?3)
                 ON CONFLICT(item_id) DO UPDATE SET delivered = 1, rule_id = excluded.rule_id
                 WHERE seen_items.delivered = 0",
            )?;
            for &(item, rule) in claims {
                stmt.execute(params![item_key(item)?, rule.0, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn mark_seen_silently(&self, items: &[ItemId]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO seen_items (item_id, delivered, rule_id, seen_at) VALUES (?1, 1, NULL, ?2)
                 ON CONFLICT(item_id) DO UPDATE SET delivered = 1
                 WHERE seen_items.delivered = 0",
            )?;
            for item in items {
                changed += stmt.execute(params![item_key(*item)?, now])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let item_id = item_key(entry.item_id)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO history
               (item_id, rule_id, rule_label, title, link, category, outcome, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item_id,
                entry.rule_id.0,
                entry.rule_label,
                entry.title,
                entry.link,
                entry.category,
                entry.outcome.as_str(),
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(HistoryEntry::from_new(conn.last_insert_rowid(), entry))
    }

    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT seq, item_id, rule_id, rule_label, title, link, category, outcome, recorded_at
             FROM history ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![clamp_history_limit(limit) as i64], history_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
