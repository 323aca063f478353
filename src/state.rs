//! Shared application state handed to every route via `web::Data`.

use crate::crypto::Vault;
use crate::gate::AuthMode;
use crate::identity::IdentityStore;
use crate::oauth::OAuthVault;
use crate::ratelimit::RateLimiter;
use crate::session::SessionStore;
use crate::tasks::TaskQueue;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything a route handler needs, wired once at startup and cloned
/// behind `web::Data` into every worker thread.
pub struct AppState {
    pub identity: IdentityStore,
    pub sessions: SessionStore,
    pub limiter: RateLimiter,
    pub vault: Vault,
    pub oauth: OAuthVault,
    pub tasks: TaskQueue,
    pub auth_mode: AuthMode,
    pub secure_cookies: bool,
    /// Serializes the setup flow so two racing `POST /setup` requests can't
    /// both pass the `has_users` check and create two admins (§5, S1).
    pub setup_lock: Arc<Mutex<()>>,
}
