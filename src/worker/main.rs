//! Task-queue worker entry point: polls the leased job queue and dispatches
//! to the registered job-kind handlers.

use inkwell::config;
use inkwell::tasks::{JobRegistry, TaskQueue, jobs};
use inkwell::{Config, TaskDatabase};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();
    let cfg = Config::from_env();
    if let Err(msg) = cfg.validate() {
        eprintln!("invalid configuration: {msg}");
        std::process::exit(1);
    }
    config::init_tracing(&cfg.observability);

    if !cfg.tasks.enabled {
        tracing::info!("task queue disabled, exiting");
        return Ok(());
    }

    let tasks_db = TaskDatabase::connect(&cfg.database.tasks_url).await?;
    tasks_db.run_migrations().await?;

    let queue = TaskQueue::new(tasks_db.pool.clone(), jobs::default_queue_configs());

    let mut registry = JobRegistry::new();
    jobs::register_all(&mut registry, tasks_db.pool.clone());
    let registry = Arc::new(registry);

    let shutdown = CancellationToken::new();

    let mut workers = Vec::with_capacity(cfg.tasks.workers);
    for id in 0..cfg.tasks.workers {
        let queue = queue.clone();
        let registry = registry.clone();
        let token = shutdown.clone();
        workers.push(tokio::spawn(async move {
            tracing::info!(worker_id = id, "worker loop starting");
            queue.run_worker(registry, token).await;
            tracing::info!(worker_id = id, "worker loop stopped");
        }));
    }

    let release_after_handle = queue.spawn_release_after(cfg.tasks.cleanup_interval, cfg.tasks.release_after, shutdown.clone());
    let cleanup_handle = queue.spawn_cleanup(cfg.tasks.cleanup_interval, cfg.tasks.retention_duration, false, shutdown.clone());

    tracing::info!(workers = cfg.tasks.workers, "inkwell-worker ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining workers");
    shutdown.cancel();

    for worker in workers {
        let _ = worker.await;
    }
    let _ = release_after_handle.await;
    let _ = cleanup_handle.await;

    Ok(())
}
