//! At-rest shape of third-party OAuth credentials (4.H, §3 OAuth token).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Ciphertexts as stored; never holds plaintext.
#[derive(Debug, Clone, FromRow)]
pub struct OAuthTokenRow {
    pub id: i64,
    pub provider: String,
    pub account_id: String,
    pub access_ciphertext: String,
    pub refresh_ciphertext: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Decrypted, in-memory-only view handed back to callers.
#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub provider: String,
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    /// Within 5 minutes of `expires_at`, or already past it. No expiry set
    /// means never expired.
    pub fn is_expired(&self) -> bool {
        self.is_expiring_soon(chrono::Duration::minutes(5))
    }

    pub fn is_expiring_soon(&self, within: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expiry) => Utc::now() + within >= expiry,
            None => false,
        }
    }
}
