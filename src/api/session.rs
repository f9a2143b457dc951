//! Minimal in-memory admin session store.
//!
//! The teacher's stack reaches for `tower-cookies` plus a JWT/token
//! scheme for richer multi-tenant auth; this surface has exactly one
//! admin user, so a signed-nothing opaque token kept server-side in a
//! `RwLock<HashMap>` (expired lazily, checked on each mutation) covers
//! it without pulling in a dependency this crate has no other use for.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tokio::sync::RwLock;

const SESSION_TTL_HOURS: i64 = 12;

#[derive(Debug, Clone)]
struct SessionEntry {
    username: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub async fn issue(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        let entry = SessionEntry { username: username.to_string(), expires_at: Utc::now() + Duration::hours(SESSION_TTL_HOURS) };
        self.inner.write().await.insert(token.clone(), entry);
        token
    }

    pub async fn validate(&self, token: &str) -> bool {
        let guard = self.inner.read().await;
        match guard.get(token) {
            Some(entry) => entry.expires_at > Utc::now(),
            None => false,
        }
    }

    pub async fn revoke(&self, token: &str) {
        self.inner.write().await.remove(token);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_token_validates_and_revoke_invalidates_it() {
        let store = SessionStore::new();
        let token = store.issue("admin").await;
        assert!(store.validate(&token).await);
        store.revoke(&token).await;
        assert!(!store.validate(&token).await);
    }

    #[tokio::test]
    async fn unknown_token_does_not_validate() {
        let store = SessionStore::new();
        assert!(!store.validate("bogus").await);
    }
}
