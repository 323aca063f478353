//! Persistent leased job queue: add, poll, execute, release-after, cleanup (4.I).

use super::model::{Job, QueueConfig};
use super::registry::JobRegistry;
use crate::error::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
    configs: Arc<HashMap<&'static str, QueueConfig>>,
}

enum DispatchOutcome {
    Finished(Result<()>),
    TimedOut,
    Cancelled,
}

impl TaskQueue {
    pub fn new(pool: SqlitePool, configs: Vec<QueueConfig>) -> Self {
        let configs = configs.into_iter().map(|c| (c.name, c)).collect();
        Self { pool, configs: Arc::new(configs) }
    }

    fn config(&self, queue: &str) -> Option<&QueueConfig> {
        self.configs.get(queue)
    }

    /// Insert a `pending` row, scheduled for immediate dispatch.
    pub async fn add(&self, queue: &str, payload: &serde_json::Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let payload_bytes = serde_json::to_vec(payload).map_err(|e| crate::error::Error::Infrastructural(e.to_string()))?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO jobs (id, queue, payload, attempts, created_at, scheduled_for, status)
             VALUES (?1, ?2, ?3, 0, ?4, ?4, 'pending')",
        )
        .bind(&id)
        .bind(queue)
        .bind(&payload_bytes)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Atomically pick and lease the oldest eligible row across the
    /// registered queues, ties broken by `scheduled_for` then `id`. The
    /// single `UPDATE ... RETURNING` statement is SQLite's equivalent of
    /// Postgres's `SELECT ... FOR UPDATE SKIP LOCKED`.
    pub async fn poll(&self) -> Result<Option<Job>> {
        if self.configs.is_empty() {
            return Ok(None);
        }
        let now = Utc::now();
        let queue_names: Vec<&str> = self.configs.keys().copied().collect();
        let placeholders = queue_names.iter().enumerate().map(|(i, _)| format!("?{}", i + 2)).collect::<Vec<_>>().join(", ");

        let sql = format!(
            "UPDATE jobs SET status = 'leased', lease_until = ?1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'pending' AND scheduled_for <= ?1 AND queue IN ({placeholders})
                 ORDER BY scheduled_for ASC, id ASC
                 LIMIT 1
             )
             RETURNING *"
        );

        let mut query = sqlx::query_as::<_, Job>(&sql).bind(now);
        for name in &queue_names {
            query = query.bind(*name);
        }

        // lease_until needs the per-queue timeout, but the UPDATE above
        // sets a placeholder value first; fix it up once we know which
        // queue was claimed.
        let leased: Option<Job> = query.fetch_optional(&self.pool).await?;
        let Some(job) = leased else { return Ok(None) };

        let timeout = self.config(&job.queue).map(|c| c.timeout).unwrap_or(Duration::from_secs(60));
        let lease_until = now + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(60));
        sqlx::query("UPDATE jobs SET lease_until = ?1 WHERE id = ?2")
            .bind(lease_until)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;

        Ok(Some(Job { lease_until: Some(lease_until), ..job }))
    }

    /// Move a succeeded job from `jobs` into `jobs_archive`.
    pub async fn complete(&self, job: &Job) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?1").bind(&job.id).execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO jobs_archive (id, queue, payload, attempts, created_at, completed_at, status, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'succeeded', NULL)",
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(job.attempts)
        .bind(job.created_at)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// On handler error: re-enter `pending` with backoff if attempts remain,
    /// else archive as `failed`.
    pub async fn retry_or_fail(&self, job: &Job, error: &str) -> Result<()> {
        let max_attempts = self.config(&job.queue).map(|c| c.max_attempts).unwrap_or(3);
        let backoff = self.config(&job.queue).map(|c| c.backoff).unwrap_or(chrono::Duration::seconds(30));
        let attempts = job.attempts + 1;

        if attempts < max_attempts {
            sqlx::query(
                "UPDATE jobs SET attempts = ?1, status = 'pending', scheduled_for = ?2, lease_until = NULL, last_error = ?3
                 WHERE id = ?4",
            )
            .bind(attempts)
            .bind(Utc::now() + backoff)
            .bind(error)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        } else {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM jobs WHERE id = ?1").bind(&job.id).execute(&mut *tx).await?;
            sqlx::query(
                "INSERT INTO jobs_archive (id, queue, payload, attempts, created_at, completed_at, status, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'failed', ?7)",
            )
            .bind(&job.id)
            .bind(&job.queue)
            .bind(&job.payload)
            .bind(attempts)
            .bind(job.created_at)
            .bind(Utc::now())
            .bind(error)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Release leases stale by more than `release_after` back to `pending`
    /// — recovers jobs whose worker crashed mid-execution.
    pub async fn release_stale(&self, release_after: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(release_after).unwrap_or(chrono::Duration::zero());
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', lease_until = NULL
             WHERE status = 'leased' AND lease_until < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete archive rows older than `retention_duration`. When
    /// `only_failed`, successes are dropped immediately and only failures
    /// age out.
    pub async fn cleanup_archive(&self, retention_duration: Duration, only_failed: bool) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention_duration).unwrap_or(chrono::Duration::zero());
        let result = if only_failed {
            sqlx::query("DELETE FROM jobs_archive WHERE status = 'succeeded' OR completed_at < ?1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("DELETE FROM jobs_archive WHERE completed_at < ?1").bind(cutoff).execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    /// Run one worker loop: poll, dispatch via `registry`, record the
    /// outcome. Exits when `token` is cancelled and no job is currently
    /// in flight.
    pub async fn run_worker(&self, registry: Arc<JobRegistry>, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            match self.poll().await {
                Ok(Some(job)) => {
                    let timeout = self.config(&job.queue).map(|c| c.timeout).unwrap_or(Duration::from_secs(60));
                    let outcome = tokio::select! {
                        result = tokio::time::timeout(timeout, registry.dispatch(&job)) => match result {
                            Ok(r) => DispatchOutcome::Finished(r),
                            Err(_) => DispatchOutcome::TimedOut,
                        },
                        _ = token.cancelled() => DispatchOutcome::Cancelled,
                    };

                    match outcome {
                        DispatchOutcome::Finished(Ok(())) => {
                            if let Err(e) = self.complete(&job).await {
                                tracing::error!(job_id = %job.id, error = %e, "failed to archive completed job");
                            }
                        }
                        DispatchOutcome::Finished(Err(e)) => {
                            if let Err(e) = self.retry_or_fail(&job, &e.to_string()).await {
                                tracing::error!(job_id = %job.id, error = %e, "failed to reschedule job");
                            }
                        }
                        DispatchOutcome::TimedOut => {
                            if let Err(e) = self.retry_or_fail(&job, "handler timed out").await {
                                tracing::error!(job_id = %job.id, error = %e, "failed to reschedule timed-out job");
                            }
                        }
                        // Shutdown mid-dispatch is not a handler failure: leave
                        // the lease alone and let `release_stale` recover it
                        // for a subsequent worker, with no attempt charged.
                        DispatchOutcome::Cancelled => {
                            tracing::info!(job_id = %job.id, "shutdown signalled mid-dispatch, leaving lease for recovery");
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                        _ = token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "error polling task queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub fn spawn_release_after(&self, interval: Duration, release_after: Duration, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.release_stale(release_after).await {
                            Ok(n) if n > 0 => tracing::info!(released = n, "released stale job leases"),
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "release-after tick failed"),
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        })
    }

    pub fn spawn_cleanup(&self, interval: Duration, retention_duration: Duration, only_failed: bool, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.cleanup_archive(retention_duration, only_failed).await {
                            Ok(n) if n > 0 => tracing::info!(deleted = n, "pruned archived jobs"),
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "cleanup tick failed"),
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::registry::JobRegistry;

    async fn queue() -> TaskQueue {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations_tasks").run(&pool).await.unwrap();
        TaskQueue::new(
            pool,
            vec![QueueConfig {
                name: "test_queue",
                max_attempts: 3,
                backoff: chrono::Duration::seconds(0),
                timeout: Duration::from_secs(5),
                retention: chrono::Duration::days(1),
                retention_only_failed: false,
            }],
        )
    }

    #[tokio::test]
    async fn add_then_poll_leases_the_job() {
        let queue = queue().await;
        queue.add("test_queue", &serde_json::json!({"x": 1})).await.unwrap();
        let job = queue.poll().await.unwrap().unwrap();
        assert_eq!(job.queue, "test_queue");
        assert!(job.lease_until.is_some());

        assert!(queue.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_moves_job_to_archive() {
        let queue = queue().await;
        queue.add("test_queue", &serde_json::json!({})).await.unwrap();
        let job = queue.poll().await.unwrap().unwrap();
        queue.complete(&job).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs").fetch_one(&queue.pool).await.unwrap();
        assert_eq!(row.0, 0);
        let archived: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs_archive WHERE status = 'succeeded'")
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(archived.0, 1);
    }

    #[tokio::test]
    async fn failure_retries_until_max_attempts_then_archives() {
        let queue = queue().await;
        queue.add("test_queue", &serde_json::json!({})).await.unwrap();

        for _ in 0..2 {
            let job = queue.poll().await.unwrap().unwrap();
            queue.retry_or_fail(&job, "boom").await.unwrap();
        }

        let job = queue.poll().await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        queue.retry_or_fail(&job, "boom again").await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs").fetch_one(&queue.pool).await.unwrap();
        assert_eq!(row.0, 0);
        let failed: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs_archive WHERE status = 'failed'")
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(failed.0, 1);
    }

    #[tokio::test]
    async fn release_stale_recovers_crashed_leases() {
        let queue = queue().await;
        queue.add("test_queue", &serde_json::json!({})).await.unwrap();
        queue.poll().await.unwrap();

        // Force the lease into the past.
        sqlx::query("UPDATE jobs SET lease_until = ?1")
            .bind(Utc::now() - chrono::Duration::seconds(10))
            .execute(&queue.pool)
            .await
            .unwrap();

        let released = queue.release_stale(Duration::from_secs(1)).await.unwrap();
        assert_eq!(released, 1);
        assert!(queue.poll().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn worker_dispatches_through_registry() {
        let queue = queue().await;
        let mut registry = JobRegistry::new();
        registry.register("test_queue", |_job| async { Ok(()) });
        queue.add("test_queue", &serde_json::json!({})).await.unwrap();

        let token = CancellationToken::new();
        let registry = Arc::new(registry);
        let worker_queue = queue.clone();
        let worker_token = token.clone();
        let handle = tokio::spawn(async move { worker_queue.run_worker(registry, worker_token).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
        handle.await.unwrap();

        let archived: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs_archive WHERE status = 'succeeded'")
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(archived.0, 1);
    }

    #[tokio::test]
    async fn shutdown_mid_dispatch_leaves_attempts_untouched() {
        let queue = queue().await;
        let mut registry = JobRegistry::new();
        registry.register("test_queue", |_job| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        queue.add("test_queue", &serde_json::json!({})).await.unwrap();

        let token = CancellationToken::new();
        let registry = Arc::new(registry);
        let worker_queue = queue.clone();
        let worker_token = token.clone();
        let handle = tokio::spawn(async move { worker_queue.run_worker(registry, worker_token).await });

        // Let the worker lease the job and enter the long-running handler,
        // then signal shutdown while it is still in flight.
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        let row: (i64, String) = sqlx::query_as("SELECT attempts, status FROM jobs").fetch_one(&queue.pool).await.unwrap();
        assert_eq!(row.0, 0, "a shutdown-cancelled attempt must not be charged against the job");
        assert_eq!(row.1, "leased", "the job stays leased for release_stale to recover, not rescheduled with backoff");
    }
}
