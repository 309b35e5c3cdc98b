//! Append-only audit log of intents and action outcomes.
//!
//! Every executor attempt produces exactly one record, confirmed or not,
//! executed or not. Records are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use domovoy_core::{HomeAction, ProxyError, Result};

/// One persisted audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogRecord {
    pub id: i64,
    pub user_id: String,
    pub intent: String,
    pub actions: Vec<HomeAction>,
    pub confirmed: bool,
    pub executed: bool,
    /// Present iff `executed` is true.
    pub success: Option<bool>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Parameters for one audit write.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub user_id: &'a str,
    pub intent: &'a str,
    pub actions: &'a [HomeAction],
    pub confirmed: bool,
    pub executed: bool,
    pub success: Option<bool>,
    pub error: Option<String>,
}

/// Audit log over the `action_log` table, sharing the recent store's
/// database.
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, entry: AuditEntry<'_>) -> Result<i64> {
        debug_assert!(
            !entry.executed || entry.success.is_some(),
            "executed records must carry an outcome"
        );

        let actions_json = serde_json::to_string(entry.actions)?;
        let result = sqlx::query(
            r#"
            INSERT INTO action_log
                (user_id, intent, actions, confirmed, executed, success, error, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.intent)
        .bind(actions_json)
        .bind(entry.confirmed)
        .bind(entry.executed)
        .bind(entry.success)
        .bind(entry.error.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        tracing::debug!(
            user_id = entry.user_id,
            intent = entry.intent,
            executed = entry.executed,
            "action logged to audit"
        );
        Ok(result.last_insert_rowid())
    }

    /// Most recent records for a user, newest first.
    pub async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ActionLogRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM action_log WHERE user_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let actions_raw: String = row.get("actions");
                let timestamp: String = row.get("timestamp");
                Ok(ActionLogRecord {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    intent: row.get("intent"),
                    actions: serde_json::from_str(&actions_raw).unwrap_or_default(),
                    confirmed: row.get("confirmed"),
                    executed: row.get("executed"),
                    success: row.get("success"),
                    error: row.get("error"),
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| ProxyError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }
}
