use crate::error::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Connection pool statistics, surfaced for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub connections_active: u32,
    pub connections_idle: u32,
    pub connections_max: u32,
}

/// Pool sizing knobs, independent of the main-vs-tasks split.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// The main database: users, sessions, oauth_tokens.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_config(database_url, PoolConfig::default()).await
    }

    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = open_pool(database_url, &config).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connections_active: self.pool.size() - self.pool.num_idle() as u32,
            connections_idle: self.pool.num_idle() as u32,
            connections_max: self.pool.size(),
        }
    }
}

/// The task-queue database: jobs, jobs_archive. Kept as a distinct pool
/// against a distinct file (§6) so queue churn never contends with the
/// main database's connections.
#[derive(Clone)]
pub struct TaskDatabase {
    pub pool: SqlitePool,
}

impl TaskDatabase {
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_config(database_url, PoolConfig::default()).await
    }

    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = open_pool(database_url, &config).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations_tasks").run(&self.pool).await?;
        Ok(())
    }
}

async fn open_pool(database_url: &str, config: &PoolConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let mut builder = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);
    if let Some(idle) = config.idle_timeout {
        builder = builder.idle_timeout(idle);
    }

    Ok(builder.connect_with(options).await?)
}
