//! Recent-ordered memory store backed by SQLite.
//!
//! Append-on-write, indexed by user, time, kind, importance and expiry.
//! The store is the single writer for a user's append log; SQLite
//! serializes concurrent appends while reads proceed through the pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

use domovoy_core::{Importance, MemoryEntry, MemoryKind, ProxyError, Result, Role};

/// Operations of the recent-ordered tier.
#[async_trait]
pub trait RecencyStore: Send + Sync {
    /// Append one entry and trim the user's log to the configured window.
    /// Returns the entry id.
    #[allow(clippy::too_many_arguments)]
    async fn add(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        kind: MemoryKind,
        importance: Importance,
        metadata: Option<Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<i64>;

    /// Most recent entries, returned in chronological order.
    async fn get_recent(
        &self,
        user_id: &str,
        limit: usize,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<MemoryEntry>>;

    async fn get_by_timerange(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MemoryEntry>>;

    /// Entries at or above `min_importance`, newest first.
    async fn get_by_importance(
        &self,
        user_id: &str,
        min_importance: Importance,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;

    async fn delete(&self, user_id: &str, id: i64) -> Result<bool>;

    /// Remove entries whose expiry has passed. Critical entries never
    /// carry an expiry, so they are untouched by construction.
    async fn cleanup_expired(&self, user_id: Option<&str>) -> Result<u64>;

    /// Persist one user rule into the rules table.
    async fn add_rule(
        &self,
        user_id: &str,
        rule_text: &str,
        rule_type: &str,
        metadata: Option<Value>,
    ) -> Result<i64>;

    /// Active rules for a user, newest first.
    async fn get_rules(&self, user_id: &str) -> Result<Vec<Value>>;

    /// Entry count per user, for stats and invariants.
    async fn count(&self, user_id: &str) -> Result<u64>;
}

/// SQLite implementation over the `dialog_history` and `user_rules`
/// tables.
pub struct SqliteRecencyStore {
    pool: SqlitePool,
    max_size: usize,
}

impl SqliteRecencyStore {
    /// Open (creating if missing) a database at `url` and run the schema.
    pub async fn connect(url: &str, max_size: usize) -> Result<Self> {
        Self::connect_pooled(url, max_size, 5).await
    }

    /// In-memory database, used by tests and ephemeral deployments.
    /// Single connection: each `:memory:` connection is its own
    /// database.
    pub async fn in_memory(max_size: usize) -> Result<Self> {
        Self::connect_pooled("sqlite::memory:", max_size, 1).await
    }

    async fn connect_pooled(url: &str, max_size: usize, connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| ProxyError::Storage(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(connections)
            .connect_with(options)
            .await
            .map_err(|e| ProxyError::Storage(e.to_string()))?;

        let store = Self { pool, max_size };
        store.migrate().await?;
        Ok(store)
    }

    /// Shared pool, for the audit log living in the same database.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS dialog_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                memory_type TEXT,
                importance TEXT,
                expires_at TEXT,
                extra_data TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_dialog_user ON dialog_history(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_dialog_timestamp ON dialog_history(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_dialog_type ON dialog_history(memory_type)",
            "CREATE INDEX IF NOT EXISTS idx_dialog_importance ON dialog_history(importance)",
            "CREATE INDEX IF NOT EXISTS idx_dialog_expires ON dialog_history(expires_at)",
            r#"
            CREATE TABLE IF NOT EXISTS user_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                rule_text TEXT NOT NULL,
                rule_type TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                extra_data TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_rules_user ON user_rules(user_id)",
            r#"
            CREATE TABLE IF NOT EXISTS action_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                intent TEXT NOT NULL,
                actions TEXT NOT NULL,
                confirmed INTEGER NOT NULL DEFAULT 0,
                executed INTEGER NOT NULL DEFAULT 0,
                success INTEGER,
                error TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_action_user ON action_log(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_action_timestamp ON action_log(timestamp)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| ProxyError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Keep only the `max_size` newest entries for a user.
    async fn trim(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM dialog_history
            WHERE user_id = ?1 AND id IN (
                SELECT id FROM dialog_history
                WHERE user_id = ?1
                ORDER BY timestamp DESC, id DESC
                LIMIT -1 OFFSET ?2
            )
            "#,
        )
        .bind(user_id)
        .bind(self.max_size as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryEntry> {
    let role: String = row.get("role");
    let kind: Option<String> = row.get("memory_type");
    let importance: Option<String> = row.get("importance");
    let timestamp: String = row.get("timestamp");
    let expires_at: Option<String> = row.get("expires_at");
    let extra: Option<String> = row.get("extra_data");
    let id: i64 = row.get("id");

    let metadata: HashMap<String, Value> = extra
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    Ok(MemoryEntry {
        id: id.to_string(),
        user_id: row.get("user_id"),
        role: role
            .parse()
            .map_err(|e: String| ProxyError::Storage(e))?,
        content: row.get("content"),
        kind: kind
            .as_deref()
            .unwrap_or("conversation")
            .parse()
            .unwrap_or(MemoryKind::Conversation),
        importance: importance
            .as_deref()
            .unwrap_or("low")
            .parse()
            .unwrap_or(Importance::Low),
        created_at: parse_ts(&timestamp)?,
        expires_at: expires_at.as_deref().map(parse_ts).transpose()?,
        similarity: None,
        metadata,
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProxyError::Storage(format!("bad timestamp '{raw}': {e}")))
}

fn importance_levels_at_or_above(min: Importance) -> Vec<&'static str> {
    [
        Importance::Low,
        Importance::Medium,
        Importance::High,
        Importance::Critical,
    ]
    .into_iter()
    .filter(|level| *level >= min)
    .map(|level| level.as_str())
    .collect()
}

#[async_trait]
impl RecencyStore for SqliteRecencyStore {
    async fn add(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        kind: MemoryKind,
        importance: Importance,
        metadata: Option<Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO dialog_history
                (user_id, role, content, timestamp, memory_type, importance, expires_at, extra_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now.to_rfc3339())
        .bind(kind.as_str())
        .bind(importance.as_str())
        .bind(expires_at.map(|t| t.to_rfc3339()))
        .bind(metadata.map(|m| m.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        let id = result.last_insert_rowid();
        self.trim(user_id).await?;

        tracing::debug!(user_id, id, kind = kind.as_str(), "added to recent store");
        Ok(id)
    }

    async fn get_recent(
        &self,
        user_id: &str,
        limit: usize,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<MemoryEntry>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    r#"
                    SELECT * FROM dialog_history
                    WHERE user_id = ?1 AND memory_type = ?2
                    ORDER BY timestamp DESC, id DESC LIMIT ?3
                    "#,
                )
                .bind(user_id)
                .bind(kind.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM dialog_history
                    WHERE user_id = ?1
                    ORDER BY timestamp DESC, id DESC LIMIT ?2
                    "#,
                )
                .bind(user_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        let mut entries: Vec<MemoryEntry> =
            rows.iter().map(row_to_entry).collect::<Result<_>>()?;
        entries.reverse();
        Ok(entries)
    }

    async fn get_by_timerange(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MemoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM dialog_history
            WHERE user_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn get_by_importance(
        &self,
        user_id: &str,
        min_importance: Importance,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let levels = importance_levels_at_or_above(min_importance);
        // Bind a fixed four-slot IN list; unused slots hold an impossible
        // value.
        let mut bound = ["", "", "", ""];
        for (slot, level) in bound.iter_mut().zip(levels.iter()) {
            *slot = level;
        }

        let rows = sqlx::query(
            r#"
            SELECT * FROM dialog_history
            WHERE user_id = ?1 AND importance IN (?2, ?3, ?4, ?5)
            ORDER BY timestamp DESC, id DESC LIMIT ?6
            "#,
        )
        .bind(user_id)
        .bind(bound[0])
        .bind(bound[1])
        .bind(bound[2])
        .bind(bound[3])
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn delete(&self, user_id: &str, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dialog_history WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ProxyError::Storage(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self, user_id: Option<&str>) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = match user_id {
            Some(user) => {
                sqlx::query(
                    "DELETE FROM dialog_history WHERE expires_at IS NOT NULL AND expires_at <= ?1 AND user_id = ?2",
                )
                .bind(&now)
                .bind(user)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "DELETE FROM dialog_history WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                )
                .bind(&now)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up expired recent entries");
        }
        Ok(deleted)
    }

    async fn add_rule(
        &self,
        user_id: &str,
        rule_text: &str,
        rule_type: &str,
        metadata: Option<Value>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_rules (user_id, rule_text, rule_type, active, created_at, extra_data)
            VALUES (?1, ?2, ?3, 1, ?4, ?5)
            "#,
        )
        .bind(user_id)
        .bind(rule_text)
        .bind(rule_type)
        .bind(Utc::now().to_rfc3339())
        .bind(metadata.map(|m| m.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    async fn get_rules(&self, user_id: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query(
            "SELECT * FROM user_rules WHERE user_id = ?1 AND active = 1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                let rule_text: String = row.get("rule_text");
                let rule_type: String = row.get("rule_type");
                let created_at: String = row.get("created_at");
                serde_json::json!({
                    "id": id,
                    "rule_text": rule_text,
                    "rule_type": rule_type,
                    "created_at": created_at,
                })
            })
            .collect())
    }

    async fn count(&self, user_id: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM dialog_history WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ProxyError::Storage(e.to_string()))?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SqliteRecencyStore {
        SqliteRecencyStore::in_memory(5).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_read_back() {
        let store = store().await;
        store
            .add(
                "u",
                Role::User,
                "включи свет в спальне",
                MemoryKind::Conversation,
                Importance::Low,
                None,
                None,
            )
            .await
            .unwrap();

        let recent = store.get_recent("u", 10, None).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "включи свет в спальне");
        assert_eq!(recent[0].role, Role::User);
        assert_eq!(recent[0].kind, MemoryKind::Conversation);
        assert_eq!(recent[0].importance, Importance::Low);
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let store = store().await;
        for i in 0..12 {
            store
                .add(
                    "u",
                    Role::User,
                    &format!("message number {i}"),
                    MemoryKind::Conversation,
                    Importance::Low,
                    None,
                    None,
                )
                .await
                .unwrap();
            assert!(store.count("u").await.unwrap() <= 5);
        }
        let recent = store.get_recent("u", 10, None).await.unwrap();
        assert_eq!(recent.len(), 5);
        // Chronological order, newest last.
        assert_eq!(recent.last().unwrap().content, "message number 11");
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let store = store().await;
        store
            .add("u", Role::User, "правило дома", MemoryKind::Rule, Importance::Critical, None, None)
            .await
            .unwrap();
        store
            .add("u", Role::User, "просто разговор", MemoryKind::Conversation, Importance::Low, None, None)
            .await
            .unwrap();

        let rules = store
            .get_recent("u", 10, Some(MemoryKind::Rule))
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].kind, MemoryKind::Rule);
    }

    #[tokio::test]
    async fn test_get_by_importance() {
        let store = store().await;
        store
            .add("u", Role::User, "мелочь", MemoryKind::Conversation, Importance::Low, None, None)
            .await
            .unwrap();
        store
            .add("u", Role::User, "действие", MemoryKind::Action, Importance::High, None, None)
            .await
            .unwrap();
        store
            .add("u", Role::User, "правило", MemoryKind::Rule, Importance::Critical, None, None)
            .await
            .unwrap();

        let important = store
            .get_by_importance("u", Importance::High, 10)
            .await
            .unwrap();
        assert_eq!(important.len(), 2);
        assert!(important.iter().all(|e| e.importance >= Importance::High));
    }

    #[tokio::test]
    async fn test_cleanup_expired_spares_unexpired() {
        let store = store().await;
        store
            .add(
                "u",
                Role::User,
                "устаревшая запись",
                MemoryKind::Conversation,
                Importance::Low,
                None,
                Some(Utc::now() - Duration::hours(1)),
            )
            .await
            .unwrap();
        store
            .add(
                "u",
                Role::User,
                "критичное правило",
                MemoryKind::Rule,
                Importance::Critical,
                None,
                None,
            )
            .await
            .unwrap();

        let deleted = store.cleanup_expired(Some("u")).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.get_recent("u", 10, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, MemoryKind::Rule);
    }

    #[tokio::test]
    async fn test_delete_scoped_to_user() {
        let store = store().await;
        let id = store
            .add("alice", Role::User, "личная запись", MemoryKind::Conversation, Importance::Low, None, None)
            .await
            .unwrap();

        assert!(!store.delete("bob", id).await.unwrap());
        assert!(store.delete("alice", id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rules_table() {
        let store = store().await;
        store
            .add_rule("u", "всегда тёплый свет вечером", "preference", None)
            .await
            .unwrap();
        let rules = store.get_rules("u").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["rule_text"], "всегда тёплый свет вечером");
    }

    #[tokio::test]
    async fn test_timerange_query() {
        let store = store().await;
        store
            .add("u", Role::User, "в окне", MemoryKind::Conversation, Importance::Low, None, None)
            .await
            .unwrap();

        let now = Utc::now();
        let hits = store
            .get_by_timerange("u", now - Duration::minutes(1), now + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = store
            .get_by_timerange("u", now + Duration::hours(1), now + Duration::hours(2))
            .await
            .unwrap();
        assert!(misses.is_empty());
    }
}
