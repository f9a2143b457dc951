//! Admin user bootstrap and password hashing. See `SPEC_FULL.md` §3.
//!
//! Single-user bootstrap: the first login against an empty table creates
//! the admin row. Password hashing is sha2 + a random per-user salt
//! rather than a dedicated password-hashing crate, matching the rest of
//! this stack's weight for a single-operator admin surface.

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub salt: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AdminStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AdminStoreError> for anyhow::Error {
    fn from(e: AdminStoreError) -> Self {
        anyhow::anyhow!(e)
    }
}

fn random_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn get_any(&self) -> Result<Option<AdminUser>, AdminStoreError>;
    async fn bootstrap(&self, username: &str, password: &str) -> Result<AdminUser, AdminStoreError>;
}

pub struct PgAdminStore {
    pool: PgPool,
}

impl PgAdminStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdminStore for PgAdminStore {
    async fn get_any(&self) -> Result<Option<AdminUser>, AdminStoreError> {
        let row = sqlx::query("SELECT id, username, password_hash, salt FROM admin_users LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(AdminUser {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                password_hash: row.try_get("password_hash")?,
                salt: row.try_get("salt")?,
            })),
            None => Ok(None),
        }
    }

    async fn bootstrap(&self, username: &str, password: &str) -> Result<AdminUser, AdminStoreError> {
        let salt = random_salt();
        let password_hash = hash_password(password, &salt);
        let row = sqlx::query(
            r#"
            INSERT INTO admin_users (username, password_hash, salt)
            VALUES ($1, $2, $3)
            RETURNING id, username, password_hash, salt
            "#,
        )
        .bind(username)
        .bind(&password_hash)
        .bind(&salt)
        .fetch_one(&self.pool)
        .await?;
        Ok(AdminUser {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            salt: row.try_get("salt")?,
        })
    }
}

/// Verifies a login attempt against an existing row, bootstrapping one if
/// the table is empty. Mirrors first-login semantics from `SPEC_FULL.md`.
pub async fn login(
    store: &dyn AdminStore,
    username: &str,
    password: &str,
) -> Result<bool, AdminStoreError> {
    match store.get_any().await? {
        Some(user) => Ok(user.username == username && hash_password(password, &user.salt) == user.password_hash),
        None => {
            store.bootstrap(username, password).await?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_different_salt_yields_different_hash() {
        let h1 = hash_password("hunter2", "salt-a");
        let h2 = hash_password("hunter2", "salt-b");
        assert_ne!(h1, h2);
    }

    #[test]
    fn hash_is_deterministic_for_same_salt() {
        let h1 = hash_password("hunter2", "salt-a");
        let h2 = hash_password("hunter2", "salt-a");
        assert_eq!(h1, h2);
    }
}
