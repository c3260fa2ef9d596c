//! In-memory token store
//!
//! Records live only as long as the process; a restart loses every stored
//! token. Used when no DATABASE_URL is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{AuthorizedUser, TokenStore};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryTokenStore {
    users: RwLock<HashMap<String, AuthorizedUser>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn upsert(&self, mut user: AuthorizedUser) -> Result<()> {
        let mut users = self.users.write().await;
        if let Some(existing) = users.get(&user.id) {
            // Keep the first-authorized timestamp on re-authorization
            user.created_at = existing.created_at;
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AuthorizedUser>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.users.write().await.remove(id).is_some())
    }

    async fn list(&self, limit: usize) -> Result<Vec<AuthorizedUser>> {
        let users = self.users.read().await;
        let mut records: Vec<AuthorizedUser> = users.values().cloned().collect();
        records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.users.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, token: &str) -> AuthorizedUser {
        AuthorizedUser::new(id, format!("user-{}", id), token, None)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_latest_tokens() {
        let store = MemoryTokenStore::new();

        let first = user("123", "token-a");
        let original_created = first.created_at;
        store.upsert(first).await.unwrap();
        store.upsert(user("123", "token-b")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get("123").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "token-b");
        assert_eq!(stored.created_at, original_created);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = MemoryTokenStore::new();
        store.upsert(user("1", "t")).await.unwrap();

        assert!(store.delete("1").await.unwrap());
        assert!(!store.delete("1").await.unwrap());
        assert!(store.get("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_respects_limit_and_retrieval_order() {
        let store = MemoryTokenStore::new();
        for id in ["1", "2", "3"] {
            store.upsert(user(id, "t")).await.unwrap();
            // Distinct creation timestamps so the order is meaningful
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let two = store.list(2).await.unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].id, "1");
        assert_eq!(two[1].id, "2");

        let all = store.list(10).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
