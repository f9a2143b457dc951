//! Changeover audit log repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct ChangeoverLogEntry {
    pub line_id: i64,
    pub state: String,
    pub detail: String,
    pub operator: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChangeoverStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ChangeoverStoreError> for anyhow::Error {
    fn from(e: ChangeoverStoreError) -> Self {
        anyhow::anyhow!(e)
    }
}

#[async_trait]
pub trait ChangeoverStore: Send + Sync {
    async fn append(
        &self,
        line_id: i64,
        state: &str,
        detail: &str,
        operator: Option<&str>,
    ) -> Result<(), ChangeoverStoreError>;
}

pub struct PgChangeoverStore {
    pool: PgPool,
}

impl PgChangeoverStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeoverStore for PgChangeoverStore {
    async fn append(
        &self,
        line_id: i64,
        state: &str,
        detail: &str,
        operator: Option<&str>,
    ) -> Result<(), ChangeoverStoreError> {
        sqlx::query(
            r#"
            INSERT INTO changeover_log (line_id, state, detail, operator, recorded_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(line_id)
        .bind(state)
        .bind(detail)
        .bind(operator)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
