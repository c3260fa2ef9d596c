//! Postgres-backed token store
//!
//! One table, one row per authorized user. Records survive restarts, which
//! the in-memory variant does not.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

use super::{AuthorizedUser, TokenStore};
use crate::error::Result;

pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    /// Connect and run the idempotent schema migration
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorized_users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Token store schema ready");
        Ok(())
    }
}

fn row_to_user(row: &PgRow) -> AuthorizedUser {
    AuthorizedUser {
        id: row.get("id"),
        username: row.get("username"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn upsert(&self, user: AuthorizedUser) -> Result<()> {
        // created_at is not updated on conflict: the first authorization wins
        sqlx::query(
            r#"
            INSERT INTO authorized_users (id, username, access_token, refresh_token, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.access_token)
        .bind(&user.refresh_token)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AuthorizedUser>> {
        let row = sqlx::query(
            "SELECT id, username, access_token, refresh_token, created_at \
             FROM authorized_users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_user(&r)))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM authorized_users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, limit: usize) -> Result<Vec<AuthorizedUser>> {
        let rows = sqlx::query(
            "SELECT id, username, access_token, refresh_token, created_at \
             FROM authorized_users ORDER BY created_at, id LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_user).collect())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authorized_users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}
