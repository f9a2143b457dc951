//! Postgres-backed implementation of `edge_messaging::OutboxStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edge_messaging::{OutboxError, OutboxMessage, OutboxStore};
use sqlx::{PgPool, Row};

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(&self, payload: Vec<u8>, msg_type: &str) -> Result<i64, OutboxError> {
        let row = sqlx::query(
            r#"
            INSERT INTO outbox_messages (payload, msg_type, retries, created_at)
            VALUES ($1, $2, 0, now())
            RETURNING id
            "#,
        )
        .bind(&payload)
        .bind(msg_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OutboxError(anyhow::anyhow!(e)))?;
        row.try_get("id").map_err(|e| OutboxError(anyhow::anyhow!(e)))
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, OutboxError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, msg_type, retries, created_at, sent_at
            FROM outbox_messages
            WHERE sent_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError(anyhow::anyhow!(e)))?;

        rows.into_iter()
            .map(|row| {
                Ok(OutboxMessage {
                    id: row.try_get("id").map_err(|e| OutboxError(anyhow::anyhow!(e)))?,
                    payload: row.try_get("payload").map_err(|e| OutboxError(anyhow::anyhow!(e)))?,
                    msg_type: row.try_get("msg_type").map_err(|e| OutboxError(anyhow::anyhow!(e)))?,
                    retries: row.try_get("retries").map_err(|e| OutboxError(anyhow::anyhow!(e)))?,
                    created_at: row.try_get("created_at").map_err(|e| OutboxError(anyhow::anyhow!(e)))?,
                    sent_at: row.try_get("sent_at").map_err(|e| OutboxError(anyhow::anyhow!(e)))?,
                })
            })
            .collect()
    }

    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<(), OutboxError> {
        sqlx::query("UPDATE outbox_messages SET sent_at = $2 WHERE id = $1")
            .bind(id)
            .bind(sent_at)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn increment_retry(&self, id: i64) -> Result<(), OutboxError> {
        sqlx::query("UPDATE outbox_messages SET retries = retries + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
