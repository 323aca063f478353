//! `/login`, `/setup`, `/logout`, and bearer-token management (§6).

use crate::error::{Error, Result};
use crate::gate::{AuthContext, sanitize_redirect_path};
use crate::identity::Role;
use crate::ratelimit::Decision;
use crate::session::{SessionHandle, SessionPayload};
use crate::state::AppState;
use crate::validation::{validate_email, validate_password, validate_username};
use actix_web::http::header::{LOCATION, REFERER};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, ResponseError, web};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::get().to(login_page))
        .route("/login", web::post().to(login_submit))
        .route("/setup", web::get().to(setup_page))
        .route("/setup", web::post().to(setup_submit))
        .route("/logout", web::get().to(logout))
        .route("/logout", web::post().to(logout))
        .service(
            web::resource("/api/tokens")
                .route(web::post().to(generate_token))
                .route(web::delete().to(revoke_token)),
        );
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetupForm {
    username: String,
    email: String,
    password: String,
    confirm_password: String,
}

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string()
}

fn session_handle(req: &HttpRequest) -> Option<Arc<SessionHandle>> {
    req.extensions().get::<Arc<SessionHandle>>().cloned()
}

fn redirect_to(path: &str) -> HttpResponse {
    HttpResponse::Found().insert_header((LOCATION, path.to_string())).finish()
}

/// Percent-encodes a query value for a redirect. Only used for the `?error=`
/// message we build ourselves, never for untrusted wholesale URLs.
fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Mirrors the CSRF guard's error shaping (4.G): API-shaped requests get the
/// generic JSON body from `ResponseError`; a browser form post gets
/// redirected back to its `Referer` with the failure in `?error=`, or a
/// minimal HTML page when there is no `Referer` to return to.
fn render_form_error(req: &HttpRequest, err: &Error) -> HttpResponse {
    if Error::is_api_shaped(req) {
        return err.error_response();
    }

    let referer = req.headers().get(REFERER).and_then(|v| v.to_str().ok()).map(str::to_string);

    match referer {
        Some(target) => HttpResponse::Found()
            .insert_header((LOCATION, format!("{target}?error={}", encode_query_value(&err.to_string()))))
            .finish(),
        None => {
            let mut builder = HttpResponse::build(err.status_code());
            if let Error::Locked { retry_after_secs } = err {
                builder.insert_header(("Retry-After", retry_after_secs.to_string()));
            }
            builder.content_type("text/html; charset=utf-8").body(format!("<html><body>{err}</body></html>"))
        }
    }
}

async fn login_page() -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(
        "<html><body><form method=\"post\" action=\"/login\">\
         <input type=\"text\" name=\"username\" placeholder=\"username\">\
         <input type=\"password\" name=\"password\" placeholder=\"password\">\
         <button type=\"submit\">Log in</button></form></body></html>",
    )
}

/// Rate limiter is checked before the identity store so a limiter rejection
/// never touches `failed_login_count` (9, open question 2).
///
/// Catches its own errors rather than propagating through `?` so a browser
/// form post gets the HTML/redirect error shape (4.G) instead of the raw
/// JSON `ResponseError` body.
async fn login_submit(req: HttpRequest, state: web::Data<AppState>, form: web::Form<LoginForm>) -> HttpResponse {
    match login_submit_inner(&req, &state, &form).await {
        Ok(resp) => resp,
        Err(err) => render_form_error(&req, &err),
    }
}

async fn login_submit_inner(req: &HttpRequest, state: &AppState, form: &LoginForm) -> Result<HttpResponse> {
    let ip = client_ip(req);

    if let Decision::Deny { retry_after } = state.limiter.allow(&ip, &form.username) {
        return Err(Error::Locked { retry_after_secs: retry_after.as_secs() });
    }

    let user = match state.identity.authenticate(&form.username, &form.password).await {
        Ok(user) => {
            state.limiter.record_success(&ip, &form.username);
            user
        }
        Err(err) => {
            state.limiter.record_failure(&ip, &form.username);
            return Err(err);
        }
    };

    let handle = session_handle(req).ok_or_else(|| Error::Infrastructural("session middleware not installed".into()))?;
    handle
        .create_session(SessionPayload { user_id: user.id, username: user.username, role: user.role, login_at: Utc::now() })
        .await?;

    let next = form.next.as_deref().map(sanitize_redirect_path).unwrap_or_else(|| "/".to_string());
    Ok(redirect_to(&next))
}

async fn setup_page(state: web::Data<AppState>) -> Result<HttpResponse> {
    if state.identity.has_users().await? {
        return Ok(redirect_to("/login"));
    }
    Ok(HttpResponse::Ok().content_type("text/html; charset=utf-8").body(
        "<html><body><form method=\"post\" action=\"/setup\">\
         <input type=\"text\" name=\"username\" placeholder=\"username\">\
         <input type=\"email\" name=\"email\" placeholder=\"email\">\
         <input type=\"password\" name=\"password\" placeholder=\"password\">\
         <input type=\"password\" name=\"confirm_password\" placeholder=\"confirm password\">\
         <button type=\"submit\">Create admin</button></form></body></html>",
    ))
}

/// Serialized through `AppState::setup_lock` so two concurrent setup POSTs
/// cannot both observe `has_users() == false` and create two admins (§5, S1).
///
/// Catches its own errors for the same reason `login_submit` does: this is a
/// browser form endpoint, not an API one.
async fn setup_submit(req: HttpRequest, state: web::Data<AppState>, form: web::Form<SetupForm>) -> HttpResponse {
    match setup_submit_inner(&req, &state, &form).await {
        Ok(resp) => resp,
        Err(err) => render_form_error(&req, &err),
    }
}

async fn setup_submit_inner(req: &HttpRequest, state: &AppState, form: &SetupForm) -> Result<HttpResponse> {
    let _guard = state.setup_lock.lock().await;

    if state.identity.has_users().await? {
        return Ok(redirect_to("/login"));
    }

    validate_username(&form.username).map_err(|e| Error::Validation(e.to_string()))?;
    validate_email(&form.email).map_err(|e| Error::Validation(e.to_string()))?;
    validate_password(&form.password).map_err(|e| Error::Validation(e.to_string()))?;
    if form.password != form.confirm_password {
        return Err(Error::Validation("password and confirm_password do not match".to_string()));
    }

    let user = state.identity.create_user(&form.username, &form.email, &form.password, Role::Admin).await?;

    let handle = session_handle(req).ok_or_else(|| Error::Infrastructural("session middleware not installed".into()))?;
    handle
        .create_session(SessionPayload { user_id: user.id, username: user.username, role: user.role, login_at: Utc::now() })
        .await?;

    Ok(redirect_to("/"))
}

async fn logout(req: HttpRequest) -> Result<HttpResponse> {
    if let Some(handle) = session_handle(&req) {
        handle.destroy_session().await?;
    }
    Ok(redirect_to("/login"))
}

fn auth_context(req: &HttpRequest) -> Result<AuthContext> {
    req.extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| Error::Authentication("no authenticated user".to_string()))
}

async fn generate_token(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let ctx = auth_context(&req)?;
    let token = state.identity.generate_token(ctx.user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": token })))
}

async fn revoke_token(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let ctx = auth_context(&req)?;
    state.identity.revoke_token(ctx.user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
