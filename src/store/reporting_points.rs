//! Reporting point + counter snapshot repository. See `spec.md` §4.E.

use async_trait::async_trait;
use edge_types::AnomalyKind;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct ReportingPoint {
    pub id: i64,
    pub plc: String,
    pub tag: String,
    pub job_style_id: Option<i64>,
    pub line_id: Option<i64>,
    pub last_count: i64,
    pub enabled: bool,
    pub warlink_managed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportingPointStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown anomaly kind {0}")]
    UnknownAnomaly(String),
}

impl From<ReportingPointStoreError> for anyhow::Error {
    fn from(e: ReportingPointStoreError) -> Self {
        anyhow::anyhow!(e)
    }
}

fn anomaly_str(anomaly: Option<AnomalyKind>) -> Option<&'static str> {
    match anomaly {
        None => None,
        Some(AnomalyKind::Reset) => Some("reset"),
        Some(AnomalyKind::Jump) => Some("jump"),
    }
}

#[async_trait]
pub trait ReportingPointStore: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<ReportingPoint>, ReportingPointStoreError>;
    async fn active_job_style_for_line(&self, line_id: i64) -> Result<Option<i64>, ReportingPointStoreError>;
    async fn record_snapshot(
        &self,
        reporting_point_id: i64,
        count_value: i64,
        delta: i64,
        anomaly: Option<AnomalyKind>,
        operator_confirmed: bool,
    ) -> Result<i64, ReportingPointStoreError>;
    async fn update_last_count(&self, reporting_point_id: i64, last_count: i64) -> Result<(), ReportingPointStoreError>;
    async fn confirm_snapshot(&self, snapshot_id: i64) -> Result<(), ReportingPointStoreError>;
    async fn dismiss_snapshot(&self, snapshot_id: i64) -> Result<(), ReportingPointStoreError>;
}

pub struct PgReportingPointStore {
    pool: PgPool,
}

impl PgReportingPointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportingPointStore for PgReportingPointStore {
    async fn list_enabled(&self) -> Result<Vec<ReportingPoint>, ReportingPointStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, plc, tag, job_style_id, line_id, last_count, enabled, warlink_managed
            FROM reporting_points WHERE enabled = true
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ReportingPoint {
                    id: row.try_get("id")?,
                    plc: row.try_get("plc")?,
                    tag: row.try_get("tag")?,
                    job_style_id: row.try_get("job_style_id")?,
                    line_id: row.try_get("line_id")?,
                    last_count: row.try_get("last_count")?,
                    enabled: row.try_get("enabled")?,
                    warlink_managed: row.try_get("warlink_managed")?,
                })
            })
            .collect()
    }

    async fn active_job_style_for_line(&self, line_id: i64) -> Result<Option<i64>, ReportingPointStoreError> {
        let row = sqlx::query("SELECT active_job_style_id FROM production_lines WHERE id = $1")
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("active_job_style_id")?),
            None => Ok(None),
        }
    }

    async fn record_snapshot(
        &self,
        reporting_point_id: i64,
        count_value: i64,
        delta: i64,
        anomaly: Option<AnomalyKind>,
        operator_confirmed: bool,
    ) -> Result<i64, ReportingPointStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO counter_snapshots
                (reporting_point_id, count_value, delta, anomaly, operator_confirmed, recorded_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING id
            "#,
        )
        .bind(reporting_point_id)
        .bind(count_value)
        .bind(delta)
        .bind(anomaly_str(anomaly))
        .bind(operator_confirmed)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn update_last_count(&self, reporting_point_id: i64, last_count: i64) -> Result<(), ReportingPointStoreError> {
        sqlx::query("UPDATE reporting_points SET last_count = $2 WHERE id = $1")
            .bind(reporting_point_id)
            .bind(last_count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn confirm_snapshot(&self, snapshot_id: i64) -> Result<(), ReportingPointStoreError> {
        sqlx::query("UPDATE counter_snapshots SET operator_confirmed = true WHERE id = $1")
            .bind(snapshot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dismiss_snapshot(&self, snapshot_id: i64) -> Result<(), ReportingPointStoreError> {
        sqlx::query("DELETE FROM counter_snapshots WHERE id = $1")
            .bind(snapshot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
