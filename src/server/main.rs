//! HTTP API entry point: wires configuration, storage, and middleware into
//! a running `actix-web` server.

use actix_web::{App, HttpServer, web};
use inkwell::crypto::Vault;
use inkwell::identity::{IdentityStore, Role};
use inkwell::oauth::OAuthVault;
use inkwell::ratelimit::{RateLimiter, RateLimiterConfig};
use inkwell::session::{SessionCookieConfig, SessionMiddlewareFactory, SessionStore};
use inkwell::tasks::{TaskQueue, jobs};
use inkwell::{AppState, Config, Database, TaskDatabase, app_middleware, config, csrf, gate, headers, routes};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

fn convert_auth_mode(mode: config::AuthMode) -> gate::AuthMode {
    match mode {
        config::AuthMode::None => gate::AuthMode::None,
        config::AuthMode::Local => gate::AuthMode::Local,
    }
}

async fn seed_admin(identity: &IdentityStore, admin: &config::AdminConfig) -> inkwell::Result<()> {
    if identity.has_users().await? {
        return Ok(());
    }
    let email = format!("{}@admin.local", admin.username);
    identity.create_user(&admin.username, &email, &admin.password, Role::Admin).await?;
    tracing::info!(username = %admin.username, "seeded default admin user");
    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();
    let cfg = Config::from_env();
    if let Err(msg) = cfg.validate() {
        eprintln!("invalid configuration: {msg}");
        std::process::exit(1);
    }
    config::init_tracing(&cfg.observability);

    let db = Database::connect(&cfg.database.url).await?;
    db.run_migrations().await?;

    let tasks_db = TaskDatabase::connect(&cfg.database.tasks_url).await?;
    tasks_db.run_migrations().await?;

    let vault = Vault::from_config(&cfg.vault)?;

    let identity = IdentityStore::new(
        db.pool.clone(),
        cfg.auth.password_cost,
        cfg.auth.max_login_attempts,
        cfg.auth.lockout_duration,
        cfg.auth.token_expiry,
    );

    if let Some(admin) = &cfg.admin {
        seed_admin(&identity, admin).await?;
    }

    let sessions = SessionStore::new(db.pool.clone(), cfg.auth.session_lifetime);
    let limiter = RateLimiter::new(RateLimiterConfig {
        max_attempts: cfg.auth.max_login_attempts,
        window: cfg.auth.rate_limit_window,
        lockout: cfg.auth.lockout_duration,
        cleanup_interval: Duration::from_secs(5 * 60),
    });
    let oauth = OAuthVault::new(db.pool.clone(), vault.clone());
    let tasks = TaskQueue::new(tasks_db.pool.clone(), jobs::default_queue_configs());

    let shutdown = CancellationToken::new();
    limiter.spawn_cleanup(shutdown.clone());
    tasks.spawn_release_after(cfg.tasks.cleanup_interval, cfg.tasks.release_after, shutdown.clone());
    tasks.spawn_cleanup(cfg.tasks.cleanup_interval, cfg.tasks.retention_duration, false, shutdown.clone());

    let app_state = web::Data::new(AppState {
        identity: identity.clone(),
        sessions: sessions.clone(),
        limiter,
        vault,
        oauth,
        tasks,
        auth_mode: convert_auth_mode(cfg.auth.mode),
        secure_cookies: cfg.auth.secure_cookies,
        setup_lock: Arc::new(Mutex::new(())),
    });

    let session_config =
        SessionCookieConfig { secure: cfg.auth.secure_cookies, lifetime_secs: cfg.auth.session_lifetime.as_secs() as i64 };
    let gate_mode = convert_auth_mode(cfg.auth.mode);
    let host = cfg.api.host.clone();
    let port = cfg.api.port;

    tracing::info!(host = %host, port, "starting inkwell-server");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(csrf::CsrfGuard::new(identity.clone()))
            .wrap(gate::RequestGate::new(gate_mode, identity.clone()))
            .wrap(SessionMiddlewareFactory::new(sessions.clone(), session_config.clone()))
            .wrap(headers::SecurityHeaders)
            .wrap(app_middleware::RequestLogger)
            .wrap(app_middleware::CorrelationIdMiddleware)
            .configure(routes::configure)
    })
    .bind((host.as_str(), port))?
    .run();

    let result = server.await;
    shutdown.cancel();
    result.map_err(anyhow::Error::from)
}
