//! Append-only interaction log backed by SQLite.
//!
//! Appends are serialized through a single writer lock so ids and
//! timestamps increase together; reads go straight to the pool and only
//! ever see committed rows.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::config::HistoryConfig;
use crate::error::RagResult;
use crate::models::InteractionRecord;

pub struct InteractionLog {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    default_limit: i64,
    max_limit: i64,
}

impl InteractionLog {
    pub fn new(pool: SqlitePool, config: &HistoryConfig) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    /// Clamp a caller-supplied limit: missing or non-positive values use
    /// the default, oversized values are capped at the maximum.
    pub fn effective_limit(&self, limit: Option<i64>) -> i64 {
        match limit {
            Some(n) if n > 0 => n.min(self.max_limit),
            _ => self.default_limit,
        }
    }

    /// Durably record one exchange and return it with its assigned id.
    pub async fn append(&self, question: &str, answer: &str) -> RagResult<InteractionRecord> {
        let _guard = self.write_lock.lock().await;

        let timestamp = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO interactions (question, answer, created_at_ms) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(question)
        .bind(answer)
        .bind(timestamp.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(id, "interaction recorded");

        Ok(InteractionRecord {
            id,
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: truncate_to_millis(timestamp),
        })
    }

    /// Most recent records first; `min(effective_limit, total)` of them.
    pub async fn recent(&self, limit: Option<i64>) -> RagResult<Vec<InteractionRecord>> {
        let rows = sqlx::query(
            "SELECT id, question, answer, created_at_ms FROM interactions ORDER BY id DESC LIMIT ?",
        )
        .bind(self.effective_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| InteractionRecord {
                id: row.get("id"),
                question: row.get("question"),
                answer: row.get("answer"),
                timestamp: from_millis(row.get("created_at_ms")),
            })
            .collect())
    }

    pub async fn count(&self) -> RagResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(ts.timestamp_millis())
}
