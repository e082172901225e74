mod memory;

pub use memory::MemoryTokenStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::models::{AccessTokenRecord, NewAccessToken};

/// Persistence for issued tokens. `token_jti` is unique across all records.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a newly issued token. Fails on a duplicate jti.
    async fn create(&self, token: NewAccessToken) -> Result<AccessTokenRecord>;

    async fn read_by_token(&self, token_jti: &str) -> Result<Option<AccessTokenRecord>>;

    /// Flag a token as revoked. Returns the number of records touched.
    async fn revoke(&self, token_jti: &str) -> Result<u64>;

    /// Revoke every outstanding token of a user
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64>;

    /// Hard delete. Returns the number of records removed.
    async fn destroy(&self, token_jti: &str) -> Result<u64>;

    /// Delete records that expired before `before`
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Connectivity check for health probes
    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    /// Create a new PgTokenStore with database connection
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get pool for migrations
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create(&self, token: NewAccessToken) -> Result<AccessTokenRecord> {
        token.validate()?;

        let record = sqlx::query_as::<_, AccessTokenRecord>(
            r#"
            INSERT INTO access_tokens (id, token_jti, csrf, user_id, expires_at, is_revoked)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            RETURNING
                id,
                token_jti,
                csrf,
                user_id,
                expires_at,
                is_revoked,
                created_at,
                updated_at
            "#
        )
        .bind(Uuid::new_v4())
        .bind(&token.token_jti)
        .bind(&token.csrf)
        .bind(token.user_id)
        .bind(token.expires_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to store access token")?;

        Ok(record)
    }

    async fn read_by_token(&self, token_jti: &str) -> Result<Option<AccessTokenRecord>> {
        tracing::debug!("Querying access token record for jti: {}", token_jti);

        let record = sqlx::query_as::<_, AccessTokenRecord>(
            r#"
            SELECT
                id,
                token_jti,
                csrf,
                user_id,
                expires_at,
                is_revoked,
                created_at,
                updated_at
            FROM access_tokens
            WHERE token_jti = $1
            "#
        )
        .bind(token_jti)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read access token")?;

        Ok(record)
    }

    async fn revoke(&self, token_jti: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE access_tokens
            SET is_revoked = TRUE, updated_at = NOW()
            WHERE token_jti = $1 AND is_revoked = FALSE
            "#
        )
        .bind(token_jti)
        .execute(&self.pool)
        .await
        .context("Failed to revoke access token")?;

        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE access_tokens
            SET is_revoked = TRUE, updated_at = NOW()
            WHERE user_id = $1 AND is_revoked = FALSE
            "#
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to revoke user tokens")?;

        Ok(result.rows_affected())
    }

    async fn destroy(&self, token_jti: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM access_tokens
            WHERE token_jti = $1
            "#
        )
        .bind(token_jti)
        .execute(&self.pool)
        .await
        .context("Failed to delete access token")?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM access_tokens
            WHERE expires_at < $1
            "#
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .context("Failed to purge expired tokens")?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1 as check")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

// Integration tests for PgTokenStore require a live database; the protocol
// tests run against MemoryTokenStore.
