//! Job shape persisted in the leased queue (§3 Job, 4.I).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Leased,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: Vec<u8>,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub status: String,
    pub last_error: Option<String>,
}

impl Job {
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Per-kind policy: how many times to retry, how long between attempts,
/// how long a handler gets before its lease is considered stale, and how
/// long completed rows linger in the archive (4.I).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: &'static str,
    pub max_attempts: i64,
    pub backoff: chrono::Duration,
    pub timeout: std::time::Duration,
    pub retention: chrono::Duration,
    pub retention_only_failed: bool,
}
