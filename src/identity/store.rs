use super::model::{Role, User};
use crate::crypto::{check_password, generate_api_token, hash_password, hash_token};
use crate::error::{Error, Result};
use crate::validation::{validate_email, validate_username};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;

/// CRUD on user records, login counters, and lockout (4.C).
#[derive(Clone)]
pub struct IdentityStore {
    pool: SqlitePool,
    password_cost: u32,
    max_login_attempts: i64,
    lockout: ChronoDuration,
    token_expiry: Option<ChronoDuration>,
}

impl IdentityStore {
    pub fn new(
        pool: SqlitePool,
        password_cost: u32,
        max_login_attempts: u32,
        lockout: std::time::Duration,
        token_expiry: Option<std::time::Duration>,
    ) -> Self {
        Self {
            pool,
            password_cost,
            max_login_attempts: max_login_attempts as i64,
            lockout: ChronoDuration::from_std(lockout).unwrap_or(ChronoDuration::seconds(1800)),
            token_expiry: token_expiry.map(|d| ChronoDuration::from_std(d).unwrap_or(ChronoDuration::zero())),
        }
    }

    /// `true` iff no active user exists yet. Used by the setup flow.
    pub async fn has_users(&self) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 > 0)
    }

    /// Validate format, hash the password, and reject duplicates by
    /// username OR email.
    pub async fn create_user(&self, username: &str, email: &str, password: &str, role: Role) -> Result<User> {
        validate_username(username).map_err(|e| Error::Validation(e.to_string()))?;
        validate_email(email).map_err(|e| Error::Validation(e.to_string()))?;
        let password_hash = hash_password(password, self.password_cost)?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM users WHERE (username = ?1 OR email = ?2) AND deleted_at IS NULL")
                .bind(username)
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(Error::Conflict("username or email already exists".to_string()));
        }

        let id = sqlx::query(
            "INSERT INTO users (username, email, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(username)
        .bind(email)
        .bind(&password_hash)
        .bind(role)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.find_by_id(id).await?.ok_or_else(|| Error::Infrastructural("user vanished after insert".to_string()))
    }

    /// Look up by username or email, enforce lockout, verify password, and
    /// update login counters. Lockout is checked *before* the password.
    pub async fn authenticate(&self, username_or_email: &str, password: &str) -> Result<User> {
        let user: Option<User> = sqlx::query_as(
            "SELECT * FROM users WHERE (username = ?1 OR email = ?1) AND deleted_at IS NULL",
        )
        .bind(username_or_email)
        .fetch_optional(&self.pool)
        .await?;

        let user = user.ok_or_else(|| Error::Authentication("no such user".to_string()))?;

        let now = Utc::now();
        if let Some(until) = user.locked_until {
            if until > now {
                let retry_after = (until - now).num_seconds().max(0) as u64;
                return Err(Error::Locked { retry_after_secs: retry_after });
            }
        }

        if check_password(password, &user.password_hash).is_err() {
            self.record_login_failure(user.id, user.failed_login_count).await?;
            return Err(Error::Authentication("invalid credentials".to_string()));
        }

        self.record_login_success(user.id).await?;
        self.find_by_id(user.id)
            .await?
            .ok_or_else(|| Error::Infrastructural("user vanished after login".to_string()))
    }

    async fn record_login_failure(&self, user_id: i64, current_count: i64) -> Result<()> {
        let new_count = current_count + 1;
        if new_count >= self.max_login_attempts {
            let locked_until = Utc::now() + self.lockout;
            sqlx::query("UPDATE users SET failed_login_count = ?1, locked_until = ?2, updated_at = ?3 WHERE id = ?4")
                .bind(new_count)
                .bind(locked_until)
                .bind(Utc::now())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE users SET failed_login_count = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(new_count)
                .bind(Utc::now())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn record_login_success(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET failed_login_count = 0, locked_until = NULL, last_login_at = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Generate a new API token, persisting only its hash and creation
    /// timestamp. Returns the plaintext for one-time display.
    pub async fn generate_token(&self, user_id: i64) -> Result<String> {
        let (plaintext, hash) = generate_api_token();
        let result = sqlx::query(
            "UPDATE users SET api_token_hash = ?1, api_token_created_at = ?2, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(&hash)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("no such user: {user_id}")));
        }
        Ok(plaintext)
    }

    /// Hash the presented token and look it up; enforce expiry relative to
    /// `api_token_created_at` when `token_expiry` is configured.
    pub async fn validate_token(&self, plaintext: &str) -> Result<User> {
        let hash = hash_token(plaintext);
        let user: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE api_token_hash = ?1 AND deleted_at IS NULL")
                .bind(&hash)
                .fetch_optional(&self.pool)
                .await?;

        let user = user.ok_or_else(|| Error::Authentication("invalid token".to_string()))?;

        if let Some(expiry) = self.token_expiry {
            if let Some(created_at) = user.api_token_created_at {
                if Utc::now() - created_at > expiry {
                    return Err(Error::Authentication("token expired".to_string()));
                }
            }
        }

        Ok(user)
    }

    pub async fn revoke_token(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET api_token_hash = NULL, api_token_created_at = NULL, updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn change_password(&self, user_id: i64, old: &str, new: &str) -> Result<()> {
        let user = self
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no such user: {user_id}")))?;
        check_password(old, &user.password_hash)?;
        let new_hash = hash_password(new, self.password_cost)?;
        sqlx::query("UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(new_hash)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = ?1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}
