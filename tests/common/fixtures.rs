//! Small response/cookie helpers shared across integration tests.

use actix_web::dev::ServiceResponse;
use actix_web::http::header::SET_COOKIE;

/// Pull the `session` cookie's value out of a response's `Set-Cookie`
/// header, if present.
pub fn session_cookie_value<B>(resp: &ServiceResponse<B>) -> Option<String> {
    resp.headers().get(SET_COOKIE).and_then(|v| v.to_str().ok()).and_then(|raw| {
        raw.split(';').next().and_then(|kv| {
            let mut parts = kv.splitn(2, '=');
            let name = parts.next()?;
            let value = parts.next()?;
            (name.trim() == "session").then(|| value.trim().to_string())
        })
    })
}
