use actix_web::{HttpRequest, HttpResponse, ResponseError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error taxonomy, organized by kind rather than by source type.
///
/// Every handler and store returns one of these; `error_response` decides
/// JSON-vs-HTML and status code per request shape, matching the propagation
/// policy in the error handling design.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A login attempt was rejected because the account (or the rate
    /// limiter's view of it) is currently locked out.
    #[error("account locked, retry after {retry_after_secs}s")]
    Locked { retry_after_secs: u64 },

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("csrf validation failed: {0}")]
    Csrf(String),

    /// AEAD authentication failure — wrong key or tampered ciphertext.
    /// Never retried; never papered over.
    #[error("cryptographic operation failed: {0}")]
    Cryptographic(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// DB unavailable, disk full, job-store corruption, IO failure.
    #[error("infrastructural error: {0}")]
    Infrastructural(String),

    /// Context deadline or shutdown; non-retryable for the current attempt.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    fn status_and_kind(&self) -> (actix_web::http::StatusCode, &'static str) {
        use actix_web::http::StatusCode;
        match self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Error::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication"),
            Error::Locked { .. } => (StatusCode::UNAUTHORIZED, "locked"),
            Error::Authorization(_) => (StatusCode::FORBIDDEN, "authorization"),
            Error::Csrf(_) => (StatusCode::FORBIDDEN, "csrf"),
            Error::Cryptographic(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cryptographic"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Error::Infrastructural(_) => (StatusCode::INTERNAL_SERVER_ERROR, "infrastructural"),
            Error::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        }
    }

    /// True when the caller is API-shaped and should get a JSON error body
    /// rather than an HTML redirect, per the request-gate classification.
    pub fn is_api_shaped(req: &HttpRequest) -> bool {
        if req.path().starts_with("/api/") {
            return true;
        }
        if req
            .headers()
            .get(actix_web::http::header::ACCEPT)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|v| v.contains("application/json"))
        {
            return true;
        }
        req.headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .is_some()
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.status_and_kind().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, kind) = self.status_and_kind();
        let mut builder = HttpResponse::build(status);
        if let Error::Locked { retry_after_secs } = self {
            builder.insert_header(("Retry-After", retry_after_secs.to_string()));
        }
        builder.json(serde_json::json!({
            "error": {
                "type": kind,
                "message": self.to_string(),
            }
        }))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("record not found".to_string()),
            other => Error::Infrastructural(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Infrastructural(format!("migration failed: {err}"))
    }
}

impl From<argon2::password_hash::Error> for Error {
    fn from(err: argon2::password_hash::Error) -> Self {
        Error::Cryptographic(format!("password hashing error: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Infrastructural(err.to_string())
    }
}
