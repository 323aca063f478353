//! Server-side session records, backed by the `sessions` table (4.D).

use crate::crypto::generate_session_secret;
use crate::error::Result;
use crate::identity::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// What gets serialized into a session row. Rewritten only on login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub login_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token: String,
    pub payload: SessionPayload,
    pub expiry: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    lifetime: chrono::Duration,
}

impl SessionStore {
    pub fn new(pool: SqlitePool, lifetime: std::time::Duration) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::hours(24));
        Self { pool, lifetime }
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        self.lifetime / 2
    }

    /// Create a brand-new token bound to `payload`, persisted with an
    /// absolute expiry `lifetime` out.
    pub async fn create(&self, payload: SessionPayload) -> Result<SessionRecord> {
        let token = generate_session_secret();
        let expiry = Utc::now() + self.lifetime;
        let data = serde_json::to_vec(&payload).map_err(|e| crate::error::Error::Infrastructural(e.to_string()))?;

        sqlx::query("INSERT INTO sessions (token, data, expiry) VALUES (?1, ?2, ?3)")
            .bind(&token)
            .bind(&data)
            .bind(expiry.timestamp() as f64)
            .execute(&self.pool)
            .await?;

        Ok(SessionRecord { token, payload, expiry })
    }

    /// Load a session by token, honoring both absolute and idle expiry.
    /// Returns `None` for a missing, absolute-expired, or idle-expired
    /// session (the caller should treat all three as "not authenticated").
    pub async fn load(&self, token: &str) -> Result<Option<SessionRecord>> {
        let row: Option<(Vec<u8>, f64)> =
            sqlx::query_as("SELECT data, expiry FROM sessions WHERE token = ?1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        let Some((data, expiry_secs)) = row else {
            return Ok(None);
        };

        let expiry = DateTime::from_timestamp(expiry_secs as i64, 0).unwrap_or(Utc::now());
        let now = Utc::now();
        if expiry <= now {
            self.destroy(token).await?;
            return Ok(None);
        }

        let payload: SessionPayload =
            serde_json::from_slice(&data).map_err(|e| crate::error::Error::Infrastructural(e.to_string()))?;

        if now - payload.login_at > self.idle_timeout() {
            self.destroy(token).await?;
            return Ok(None);
        }

        Ok(Some(SessionRecord { token: token.to_string(), payload, expiry }))
    }

    pub async fn destroy(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?1").bind(token).execute(&self.pool).await?;
        Ok(())
    }

    /// Purge rows past their absolute expiry. Not invoked by a background
    /// ticker in this crate (the sessions table is small relative to the
    /// task queue); called opportunistically from the setup/admin paths.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp() as f64;
        let result = sqlx::query("DELETE FROM sessions WHERE expiry <= ?1").bind(now).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
