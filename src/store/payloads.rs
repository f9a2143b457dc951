//! Payload repository: the line-side container slots consumed by
//! production and replenished by retrieve orders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edge_types::PayloadStatus;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct Payload {
    pub id: i64,
    pub job_style_id: i64,
    pub location: String,
    pub staging_location: Option<String>,
    pub description: Option<String>,
    pub manifest: serde_json::Value,
    pub unit_multiplier: f64,
    pub capacity: i64,
    pub remaining: i64,
    pub reorder_point: i64,
    pub reorder_qty: f64,
    pub retrieve_empty: bool,
    pub status: PayloadStatus,
    pub auto_reorder: bool,
    pub has_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn status_str(status: PayloadStatus) -> &'static str {
    match status {
        PayloadStatus::Active => "active",
        PayloadStatus::Replenishing => "replenishing",
        PayloadStatus::Empty => "empty",
        PayloadStatus::Hold => "hold",
    }
}

fn parse_status(raw: &str) -> Result<PayloadStatus, PayloadStoreError> {
    match raw {
        "active" => Ok(PayloadStatus::Active),
        "replenishing" => Ok(PayloadStatus::Replenishing),
        "empty" => Ok(PayloadStatus::Empty),
        "hold" => Ok(PayloadStatus::Hold),
        other => Err(PayloadStoreError::UnknownStatus(other.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown payload status {0}")]
    UnknownStatus(String),
}

impl From<PayloadStoreError> for anyhow::Error {
    fn from(e: PayloadStoreError) -> Self {
        anyhow::anyhow!(e)
    }
}

/// Storage seam the payload/reorder engine depends on. Implemented here
/// against Postgres; unit tests implement it against an in-memory map.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn list_active_for_style(&self, job_style_id: i64) -> Result<Vec<Payload>, PayloadStoreError>;
    async fn persist_consumption(
        &self,
        id: i64,
        remaining: i64,
        status: PayloadStatus,
    ) -> Result<(), PayloadStoreError>;
    async fn get(&self, id: i64) -> Result<Option<Payload>, PayloadStoreError>;
    async fn reset_to_active(&self, id: i64, description: Option<String>) -> Result<(), PayloadStoreError>;
    async fn update_reorder_settings(
        &self,
        id: i64,
        reorder_point: i64,
        reorder_qty: f64,
        auto_reorder: bool,
    ) -> Result<(), PayloadStoreError>;
}

pub struct PgPayloadStore {
    pool: PgPool,
}

impl PgPayloadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayloadStore for PgPayloadStore {
    async fn list_active_for_style(&self, job_style_id: i64) -> Result<Vec<Payload>, PayloadStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_style_id, location, staging_location, description, manifest,
                   unit_multiplier, capacity, remaining, reorder_point, reorder_qty,
                   retrieve_empty, status, auto_reorder, has_description, created_at, updated_at
            FROM payloads
            WHERE job_style_id = $1 AND status IN ('active', 'replenishing')
            ORDER BY id
            "#,
        )
        .bind(job_style_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_payload).collect()
    }

    async fn persist_consumption(
        &self,
        id: i64,
        remaining: i64,
        status: PayloadStatus,
    ) -> Result<(), PayloadStoreError> {
        sqlx::query(
            r#"
            UPDATE payloads
            SET remaining = $2, status = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status_str(status))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Payload>, PayloadStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_style_id, location, staging_location, description, manifest,
                   unit_multiplier, capacity, remaining, reorder_point, reorder_qty,
                   retrieve_empty, status, auto_reorder, has_description, created_at, updated_at
            FROM payloads
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_payload).transpose()
    }

    async fn reset_to_active(&self, id: i64, description: Option<String>) -> Result<(), PayloadStoreError> {
        sqlx::query(
            r#"
            UPDATE payloads
            SET remaining = capacity, status = 'active', has_description = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_reorder_settings(
        &self,
        id: i64,
        reorder_point: i64,
        reorder_qty: f64,
        auto_reorder: bool,
    ) -> Result<(), PayloadStoreError> {
        sqlx::query(
            r#"
            UPDATE payloads
            SET reorder_point = $2, reorder_qty = $3, auto_reorder = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reorder_point)
        .bind(reorder_qty)
        .bind(auto_reorder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_payload(row: sqlx::postgres::PgRow) -> Result<Payload, PayloadStoreError> {
    let status_raw: String = row.try_get("status")?;
    let status = parse_status(&status_raw)?;
    Ok(Payload {
        id: row.try_get("id")?,
        job_style_id: row.try_get("job_style_id")?,
        location: row.try_get("location")?,
        staging_location: row.try_get("staging_location")?,
        description: row.try_get("description")?,
        manifest: row.try_get("manifest")?,
        unit_multiplier: row.try_get("unit_multiplier")?,
        capacity: row.try_get("capacity")?,
        remaining: row.try_get("remaining")?,
        reorder_point: row.try_get("reorder_point")?,
        reorder_qty: row.try_get("reorder_qty")?,
        retrieve_empty: row.try_get("retrieve_empty")?,
        status,
        auto_reorder: row.try_get("auto_reorder")?,
        has_description: row.try_get("has_description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
