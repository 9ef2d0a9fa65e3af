use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{error::Result, models::refresh_token::RefreshSession};

/// Durable record of issued refresh sessions.
///
/// Only the session lifecycle manager writes through this trait.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Records a newly issued refresh session.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The owner of the session.
    /// * `token_hash` - The SHA-256 hex of the refresh token. The token itself is never stored.
    /// * `expires_at` - When the session stops being honored.
    ///
    /// # Returns
    ///
    /// The stored row.
    async fn create(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession>;

    /// Returns the row only if it is neither revoked nor expired.
    async fn find_valid(&self, token_hash: &str, now: DateTime<Utc>)
    -> Result<Option<RefreshSession>>;

    /// Atomically revokes a currently valid row and returns it.
    ///
    /// Of several concurrent callers presenting the same hash, exactly one
    /// gets `Some`.
    ///
    /// # Arguments
    ///
    /// * `token_hash` - The hash of the presented refresh token.
    /// * `now` - The current time, recorded as `revoked_at`.
    ///
    /// # Returns
    ///
    /// The consumed row, or `None` if it is unknown, revoked, expired or was
    /// consumed by a concurrent caller.
    async fn consume(&self, token_hash: &str, now: DateTime<Utc>)
    -> Result<Option<RefreshSession>>;

    /// Idempotent. Returns whether this call changed a row.
    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Revokes every live session of a user.
    ///
    /// # Returns
    ///
    /// How many sessions were still live.
    async fn revoke_all_for_user(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64>;

    /// Physically removes rows that expired or were revoked longer ago than `retention`.
    ///
    /// # Arguments
    ///
    /// * `now` - The current time.
    /// * `retention` - How long dead rows are kept for auditing.
    ///
    /// # Returns
    ///
    /// The number of rows deleted.
    async fn purge_expired(&self, now: DateTime<Utc>, retention: Duration) -> Result<u64>;
}

macro_rules! session_columns {
    () => {
        "id, user_id, token_hash, expires_at, revoked, revoked_at, created_at"
    };
}

fn row_to_session(row: &Row) -> Result<RefreshSession> {
    Ok(RefreshSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Postgres-backed refresh session store.
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: Pool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                concat!(
                    "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) ",
                    "VALUES ($1, $2, $3) ",
                    "RETURNING ",
                    session_columns!()
                ),
                &[&user_id, &token_hash, &expires_at],
            )
            .await?;
        row_to_session(&row)
    }

    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                concat!(
                    "SELECT ",
                    session_columns!(),
                    " FROM refresh_tokens",
                    " WHERE token_hash = $1 AND revoked = FALSE AND expires_at > $2"
                ),
                &[&token_hash, &now],
            )
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>> {
        let client = self.pool.get().await?;
        // Single conditional update: the row lock makes the loser see revoked = TRUE.
        let row = client
            .query_opt(
                concat!(
                    "UPDATE refresh_tokens ",
                    "SET revoked = TRUE, revoked_at = $2 ",
                    "WHERE token_hash = $1 AND revoked = FALSE AND expires_at > $2 ",
                    "RETURNING ",
                    session_columns!()
                ),
                &[&token_hash, &now],
            )
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE refresh_tokens
                SET revoked = TRUE, revoked_at = $2
                WHERE token_hash = $1 AND revoked = FALSE
                "#,
                &[&token_hash, &now],
            )
            .await?;
        Ok(updated > 0)
    }

    /// Revokes every live session of a user.
    ///
    /// # Returns
    ///
    /// How many sessions were still live.
    async fn revoke_all_for_user(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE refresh_tokens
                SET revoked = TRUE, revoked_at = $2
                WHERE user_id = $1 AND revoked = FALSE
                "#,
                &[&user_id, &now],
            )
            .await?;
        Ok(updated)
    }

    async fn purge_expired(&self, now: DateTime<Utc>, retention: Duration) -> Result<u64> {
        let client = self.pool.get().await?;
        let cutoff = now - retention;
        let deleted = client
            .execute(
                r#"
                DELETE FROM refresh_tokens
                WHERE expires_at <= $1 OR (revoked = TRUE AND revoked_at <= $1)
                "#,
                &[&cutoff],
            )
            .await?;
        Ok(deleted)
    }
}
