//! Token store for authorized users
//!
//! Each successful OAuth callback produces one record per Discord user.
//! The store is injected behind a trait so the bot can run with either the
//! in-memory map (default) or a Postgres table (when DATABASE_URL is set).

mod memory;
mod postgres;

pub use memory::MemoryTokenStore;
pub use postgres::PostgresTokenStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// A user who completed the OAuth flow, with their delegated tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    /// Discord user ID (snowflake as string)
    pub id: String,

    /// Username at the time of authorization
    pub username: String,

    /// OAuth access token (bearer credential)
    pub access_token: String,

    /// Refresh token, if the provider returned one
    pub refresh_token: Option<String>,

    /// When the user first authorized
    pub created_at: DateTime<Utc>,
}

impl AuthorizedUser {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            access_token: access_token.into(),
            refresh_token,
            created_at: Utc::now(),
        }
    }
}

/// Storage contract for authorized users.
///
/// Upsert keeps at most one record per user ID; re-authorization overwrites
/// the tokens and username but keeps the original `created_at`. `list`
/// returns records ordered by `(created_at, id)` so send runs attempt users
/// in a stable order.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn upsert(&self, user: AuthorizedUser) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<AuthorizedUser>>;

    /// Remove a record. Returns whether a record existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Fetch up to `limit` records in retrieval order.
    async fn list(&self, limit: usize) -> Result<Vec<AuthorizedUser>>;

    async fn count(&self) -> Result<u64>;
}

/// Shared token store type
pub type SharedTokenStore = Arc<dyn TokenStore>;
