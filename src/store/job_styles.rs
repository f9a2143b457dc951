//! Job-style catalog id lookups, used only by the production reporter to
//! translate a reporting point's job style into the catalog ids production
//! should be attributed to.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::heartbeat::JobStyleCatalog;

#[derive(Debug, thiserror::Error)]
pub enum JobStyleStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobStyleStore: Send + Sync {
    async fn catalog_ids(&self, job_style_id: i64) -> Result<Vec<String>, JobStyleStoreError>;

    /// Full job-style-id -> catalog-ids map, used to (re)populate
    /// `CachedJobStyleCatalog`.
    async fn load_all(&self) -> Result<std::collections::HashMap<i64, Vec<String>>, JobStyleStoreError>;
}

pub struct PgJobStyleStore {
    pool: PgPool,
}

impl PgJobStyleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStyleStore for PgJobStyleStore {
    async fn catalog_ids(&self, job_style_id: i64) -> Result<Vec<String>, JobStyleStoreError> {
        let rows = sqlx::query("SELECT catalog_id FROM job_style_catalog_ids WHERE job_style_id = $1")
            .bind(job_style_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|row| Ok(row.try_get("catalog_id")?)).collect()
    }

    async fn load_all(&self) -> Result<std::collections::HashMap<i64, Vec<String>>, JobStyleStoreError> {
        let rows = sqlx::query("SELECT job_style_id, catalog_id FROM job_style_catalog_ids").fetch_all(&self.pool).await?;
        let mut map: std::collections::HashMap<i64, Vec<String>> = std::collections::HashMap::new();
        for row in rows {
            let job_style_id: i64 = row.try_get("job_style_id")?;
            let catalog_id: String = row.try_get("catalog_id")?;
            map.entry(job_style_id).or_default().push(catalog_id);
        }
        Ok(map)
    }
}

/// Blocking-free adapter: `HeartbeatReporter::install` needs a synchronous
/// `catalog_ids` call inside a bus handler, so this wraps a prefetched
/// snapshot rather than querying per event. Refreshed by the caller on the
/// cadence it chooses (job styles change rarely).
pub struct CachedJobStyleCatalog {
    snapshot: std::sync::RwLock<std::collections::HashMap<i64, Vec<String>>>,
}

impl CachedJobStyleCatalog {
    pub fn new() -> Self {
        Self { snapshot: std::sync::RwLock::new(std::collections::HashMap::new()) }
    }

    pub fn replace(&self, snapshot: std::collections::HashMap<i64, Vec<String>>) {
        *self.snapshot.write().expect("job style cache lock poisoned") = snapshot;
    }
}

impl Default for CachedJobStyleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStyleCatalog for CachedJobStyleCatalog {
    fn catalog_ids(&self, job_style_id: i64) -> Vec<String> {
        self.snapshot
            .read()
            .expect("job style cache lock poisoned")
            .get(&job_style_id)
            .cloned()
            .unwrap_or_default()
    }
}
