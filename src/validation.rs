use regex::Regex;
use std::sync::LazyLock;
use validator::ValidationError;

static USERNAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,64}$").unwrap());

// A deliberately simple RFC-5321-length-bounded pattern, not a full RFC 5322
// parser — good enough to reject obvious garbage without rejecting valid
// addresses the stricter grammar would accept.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// `[A-Za-z0-9_-]{3,64}` (§3 User).
pub fn validate_username(value: &str) -> Result<(), ValidationError> {
    if !USERNAME_RE.is_match(value) {
        return Err(ValidationError::new("invalid_username")
            .with_message("username must be 3-64 characters of letters, digits, underscore or hyphen".into()));
    }
    Ok(())
}

/// RFC-5321 length bound (≤254) with a simple `local@domain.tld` pattern.
pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    if value.len() > 254 {
        return Err(ValidationError::new("email_too_long").with_message("email exceeds 254 characters".into()));
    }
    if !EMAIL_RE.is_match(value) {
        return Err(ValidationError::new("invalid_email").with_message("email is not a valid address".into()));
    }
    Ok(())
}

/// Length bound only — the memory-hard hash itself enforces this at hash
/// time (4.A); this lets a bad password be reported as a validation error
/// rather than propagating up as a cryptographic one.
pub fn validate_password(value: &str) -> Result<(), ValidationError> {
    if value.len() < 12 {
        return Err(ValidationError::new("password_too_short")
            .with_message("password must be at least 12 bytes".into()));
    }
    if value.len() > 72 {
        return Err(ValidationError::new("password_too_long")
            .with_message("password must be at most 72 bytes".into()));
    }
    Ok(())
}
