//! A ready-to-wrap `actix_web::test` harness over the full middleware chain,
//! mirroring how `src/server/main.rs` assembles the app.

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, Error as ActixError, web};
use inkwell::crypto::Vault;
use inkwell::gate::AuthMode;
use inkwell::identity::IdentityStore;
use inkwell::oauth::OAuthVault;
use inkwell::ratelimit::{RateLimiter, RateLimiterConfig};
use inkwell::session::{SessionCookieConfig, SessionMiddlewareFactory, SessionStore};
use inkwell::tasks::{TaskQueue, jobs};
use inkwell::{app_middleware, csrf, gate, headers, routes, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::db::TestDbs;

pub struct TestContext {
    pub identity: IdentityStore,
    pub sessions: SessionStore,
    pub state: web::Data<AppState>,
}

/// `max_login_attempts` is exposed so lockout tests can use a small
/// threshold without waiting out the production default.
pub fn build_context(dbs: &TestDbs, max_login_attempts: u32) -> TestContext {
    let identity = IdentityStore::new(
        dbs.main.pool.clone(),
        4, // cheapest Argon2 cost that still runs in a test
        max_login_attempts,
        Duration::from_secs(1),
        None,
    );
    let sessions = SessionStore::new(dbs.main.pool.clone(), Duration::from_secs(3600));
    let limiter = RateLimiter::new(RateLimiterConfig {
        max_attempts: max_login_attempts,
        window: Duration::from_secs(900),
        lockout: Duration::from_secs(1),
        cleanup_interval: Duration::from_secs(300),
    });
    let vault = Vault::from_key_bytes(&[7u8; 32]).expect("fixed test key");
    let oauth = OAuthVault::new(dbs.main.pool.clone(), vault.clone());
    let tasks = TaskQueue::new(dbs.tasks.pool.clone(), jobs::default_queue_configs());

    let state = web::Data::new(AppState {
        identity: identity.clone(),
        sessions: sessions.clone(),
        limiter,
        vault,
        oauth,
        tasks,
        auth_mode: AuthMode::Local,
        secure_cookies: false,
        setup_lock: Arc::new(Mutex::new(())),
    });

    TestContext { identity, sessions, state }
}

/// Builds the same wrap() chain as `src/server/main.rs`, parameterized so
/// tests can reuse one `TestContext` across multiple requests.
pub fn build_app(
    ctx: &TestContext,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = ActixError,
        InitError = (),
    >,
> {
    let session_config = SessionCookieConfig { secure: false, lifetime_secs: 3600 };

    App::new()
        .app_data(ctx.state.clone())
        .wrap(csrf::CsrfGuard::new(ctx.identity.clone()))
        .wrap(gate::RequestGate::new(AuthMode::Local, ctx.identity.clone()))
        .wrap(SessionMiddlewareFactory::new(ctx.sessions.clone(), session_config))
        .wrap(headers::SecurityHeaders)
        .wrap(app_middleware::RequestLogger)
        .wrap(app_middleware::CorrelationIdMiddleware)
        .configure(routes::configure)
}
