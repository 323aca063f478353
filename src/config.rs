use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub vault: VaultConfig,
    pub tasks: TaskConfig,
    pub observability: ObservabilityConfig,
    pub admin: Option<AdminConfig>,
    pub app_env: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Task-queue database URL; derived from `url` with a `-tasks` suffix
    /// before the extension when `TASKS_DATABASE_URL` is unset.
    pub tasks_url: String,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Mode of the request gate (4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Local,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub session_secret: String,
    pub session_lifetime: Duration,
    /// `None` means tokens never expire (0-means-never semantics, §9).
    pub token_expiry: Option<Duration>,
    pub password_cost: u32,
    pub secure_cookies: bool,
    pub max_login_attempts: u32,
    pub rate_limit_window: Duration,
    pub lockout_duration: Duration,
}

impl AuthConfig {
    /// Idle expiry is always half the absolute session lifetime (4.D).
    pub fn idle_timeout(&self) -> Duration {
        self.session_lifetime / 2
    }
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Base64-encoded 32-byte master key, if provided directly.
    pub key_base64: Option<String>,
    /// Path to the auto-provisioned master key file (mode 0600) used when
    /// `key_base64` is absent.
    pub key_file: String,
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub enabled: bool,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub release_after: Duration,
    pub cleanup_interval: Duration,
    pub retention_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Text,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Panics
    /// Panics if required configuration is missing or malformed — the
    /// process should not start in that state.
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env(),
            api: ApiConfig::from_env(),
            auth: AuthConfig::from_env(),
            vault: VaultConfig::from_env(),
            tasks: TaskConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
            admin: AdminConfig::from_env_optional(),
            app_env: std::env::var("APP_ENV").unwrap_or_else(|_| "local".to_string()),
        }
    }

    /// Validate the configuration, returning descriptive messages on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.api.port == 0 {
            return Err("API_PORT must be greater than 0".to_string());
        }
        if self.auth.session_secret.trim().is_empty() {
            return Err("AUTH_SESSION_SECRET resolved empty after autogeneration".to_string());
        }
        if self.auth.password_cost == 0 {
            return Err("AUTH_PASSWORD_COST must be greater than 0".to_string());
        }
        if self.auth.max_login_attempts == 0 {
            return Err("AUTH_MAX_LOGIN_ATTEMPTS must be greater than 0".to_string());
        }
        if self.tasks.enabled && self.tasks.workers == 0 {
            return Err("TASK_WORKERS must be greater than 0 when tasks are enabled".to_string());
        }
        Ok(())
    }
}

fn env_duration(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

impl DatabaseConfig {
    fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let tasks_url = std::env::var("TASKS_DATABASE_URL").unwrap_or_else(|_| derive_tasks_url(&url));
        Self { url, tasks_url }
    }
}

/// Insert a `-tasks` suffix before the file extension of a sqlite URL.
///
/// `sqlite://data/inkwell.db` -> `sqlite://data/inkwell-tasks.db`.
fn derive_tasks_url(url: &str) -> String {
    match url.rfind('.') {
        Some(idx) if idx > url.rfind('/').unwrap_or(0) => {
            format!("{}-tasks{}", &url[..idx], &url[idx..])
        }
        _ => format!("{url}-tasks"),
    }
}

impl ApiConfig {
    fn from_env() -> Self {
        let host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .expect("API_PORT must be a valid port number (0-65535)");
        Self { host, port }
    }
}

impl AuthConfig {
    fn from_env() -> Self {
        let mode = match std::env::var("AUTH_MODE").unwrap_or_else(|_| "local".to_string()).as_str() {
            "none" => AuthMode::None,
            _ => AuthMode::Local,
        };

        let session_secret = match std::env::var("AUTH_SESSION_SECRET") {
            Ok(s) if !s.trim().is_empty() => s,
            _ => {
                let generated = crate::crypto::token::generate_session_secret();
                tracing::warn!("AUTH_SESSION_SECRET not set, generated an ephemeral secret for this process");
                generated
            }
        };

        let session_lifetime = env_duration("AUTH_SESSION_LIFETIME", 24 * 3600);

        let token_expiry = std::env::var("AUTH_TOKEN_EXPIRY")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let password_cost = std::env::var("AUTH_PASSWORD_COST")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(19_456);

        let secure_cookies = std::env::var("AUTH_SECURE_COOKIES")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        let max_login_attempts = std::env::var("AUTH_MAX_LOGIN_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);

        let rate_limit_window = env_duration("AUTH_RATE_LIMIT_WINDOW", 15 * 60);
        let lockout_duration = env_duration("AUTH_LOCKOUT_DURATION", 30 * 60);

        Self {
            mode,
            session_secret,
            session_lifetime,
            token_expiry,
            password_cost,
            secure_cookies,
            max_login_attempts,
            rate_limit_window,
            lockout_duration,
        }
    }
}

impl VaultConfig {
    fn from_env() -> Self {
        Self {
            key_base64: std::env::var("TOKEN_ENCRYPTION_KEY").ok().filter(|s| !s.is_empty()),
            key_file: std::env::var("TOKEN_ENCRYPTION_KEY_FILE")
                .unwrap_or_else(|_| "./data/master.key".to_string()),
        }
    }
}

impl TaskConfig {
    fn from_env() -> Self {
        let enabled = std::env::var("TASKS_ENABLED")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        let workers = std::env::var("TASK_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(4);

        let max_retries = std::env::var("TASK_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3);

        let retry_delay = env_duration("TASK_RETRY_DELAY", 30);
        let timeout = env_duration("TASK_TIMEOUT", 120);
        let release_after = env_duration("TASK_RELEASE_AFTER", 300);
        let cleanup_interval = env_duration("TASK_CLEANUP_INTERVAL", 300);
        let retention_duration = env_duration("TASK_RETENTION_DURATION", 7 * 24 * 3600);

        Self {
            enabled,
            workers,
            max_retries,
            retry_delay,
            timeout,
            release_after,
            cleanup_interval,
            retention_duration,
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sqlx=warn".to_string());
        let log_format = match std::env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "text".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self { log_level, log_format }
    }
}

impl AdminConfig {
    fn from_env_optional() -> Option<Self> {
        let username = std::env::var("ADMIN_USERNAME").ok()?;
        let password = std::env::var("ADMIN_PASSWORD").ok()?;
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self { username, password })
    }
}

/// Load environment files based on `APP_ENV`.
///
/// Loads the base `.env` first, then `.env.{APP_ENV}` (default `local`);
/// later values override earlier ones.
pub fn load_env() {
    dotenvy::dotenv().ok();
    let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());
    dotenvy::from_filename(format!(".env.{app_env}")).ok();
}

/// Initialize structured logging from configuration.
pub fn init_tracing(config: &ObservabilityConfig) {
    let env_filter = tracing_subscriber::EnvFilter::new(&config.log_level);

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).with_file(true).with_line_number(true))
                .init();
        }
    }
}
