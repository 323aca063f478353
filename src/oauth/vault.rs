//! Encrypted persistence for third-party OAuth credentials (4.H).

use super::model::{OAuthToken, OAuthTokenRow};
use crate::crypto::Vault;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct OAuthVault {
    pool: SqlitePool,
    vault: Vault,
}

impl OAuthVault {
    pub fn new(pool: SqlitePool, vault: Vault) -> Self {
        Self { pool, vault }
    }

    fn decrypt_row(&self, row: OAuthTokenRow) -> Result<OAuthToken> {
        let access_token = self.vault.decrypt(&row.access_ciphertext)?;
        let refresh_token = if row.refresh_ciphertext.is_empty() {
            String::new()
        } else {
            self.vault.decrypt(&row.refresh_ciphertext)?
        };
        Ok(OAuthToken {
            provider: row.provider,
            account_id: row.account_id,
            access_token,
            refresh_token,
            token_type: row.token_type,
            expires_at: row.expires_at,
            scope: row.scope,
            last_used_at: row.last_used_at,
            last_refreshed_at: row.last_refreshed_at,
        })
    }

    /// Upsert on `(provider, account_id)`. Encrypts access and refresh
    /// independently.
    pub async fn save_token(&self, token: &OAuthToken) -> Result<()> {
        let access_ciphertext = self.vault.encrypt(&token.access_token)?;
        let refresh_ciphertext =
            if token.refresh_token.is_empty() { String::new() } else { self.vault.encrypt(&token.refresh_token)? };

        sqlx::query(
            "INSERT INTO oauth_tokens (provider, account_id, access_ciphertext, refresh_ciphertext, token_type, expires_at, scope)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(provider, account_id) DO UPDATE SET
                access_ciphertext = excluded.access_ciphertext,
                refresh_ciphertext = excluded.refresh_ciphertext,
                token_type = excluded.token_type,
                expires_at = excluded.expires_at,
                scope = excluded.scope",
        )
        .bind(&token.provider)
        .bind(&token.account_id)
        .bind(&access_ciphertext)
        .bind(&refresh_ciphertext)
        .bind(&token.token_type)
        .bind(token.expires_at)
        .bind(&token.scope)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Missing row returns `Ok(None)`, not an error. A wrong master key
    /// surfaces as `Error::Cryptographic` — the signal for key mismatch.
    pub async fn get_token(&self, provider: &str, account_id: &str) -> Result<Option<OAuthToken>> {
        let row: Option<OAuthTokenRow> = sqlx::query_as(
            "SELECT * FROM oauth_tokens WHERE provider = ?1 AND account_id = ?2 AND deleted_at IS NULL",
        )
        .bind(provider)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.decrypt_row(r)).transpose()
    }

    pub async fn get_token_by_provider(&self, provider: &str) -> Result<Option<OAuthToken>> {
        let row: Option<OAuthTokenRow> = sqlx::query_as(
            "SELECT * FROM oauth_tokens WHERE provider = ?1 AND deleted_at IS NULL
             ORDER BY COALESCE(last_refreshed_at, created_at) DESC LIMIT 1",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.decrypt_row(r)).transpose()
    }

    pub async fn update_token_after_refresh(
        &self,
        provider: &str,
        account_id: &str,
        new_access: &str,
        new_refresh: Option<&str>,
        new_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let access_ciphertext = self.vault.encrypt(new_access)?;
        let now = Utc::now();

        let result = match new_refresh {
            Some(refresh) if !refresh.is_empty() => {
                let refresh_ciphertext = self.vault.encrypt(refresh)?;
                sqlx::query(
                    "UPDATE oauth_tokens SET access_ciphertext = ?1, refresh_ciphertext = ?2, expires_at = ?3, last_refreshed_at = ?4
                     WHERE provider = ?5 AND account_id = ?6",
                )
                .bind(&access_ciphertext)
                .bind(&refresh_ciphertext)
                .bind(new_expires_at)
                .bind(now)
                .bind(provider)
                .bind(account_id)
                .execute(&self.pool)
                .await?
            }
            _ => {
                sqlx::query(
                    "UPDATE oauth_tokens SET access_ciphertext = ?1, expires_at = ?2, last_refreshed_at = ?3
                     WHERE provider = ?4 AND account_id = ?5",
                )
                .bind(&access_ciphertext)
                .bind(new_expires_at)
                .bind(now)
                .bind(provider)
                .bind(account_id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("no oauth token for {provider}/{account_id}")));
        }
        Ok(())
    }

    pub async fn delete_token(&self, provider: &str, account_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM oauth_tokens WHERE provider = ?1 AND account_id = ?2")
            .bind(provider)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_tokens(&self, provider: &str) -> Result<Vec<OAuthToken>> {
        let rows: Vec<OAuthTokenRow> =
            sqlx::query_as("SELECT * FROM oauth_tokens WHERE provider = ?1 AND deleted_at IS NULL")
                .bind(provider)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|r| self.decrypt_row(r)).collect()
    }
}
