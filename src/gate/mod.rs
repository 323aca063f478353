//! Per-request classifier middleware: public / bearer / session / reject (4.F).

mod redirect;

pub use redirect::sanitize_redirect_path;

use crate::error::Error;
use crate::identity::{IdentityStore, Role};
use crate::session::SessionHandle;
use actix_web::{
    HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{AUTHORIZATION, LOCATION},
};
use futures_util::future::LocalBoxFuture;
use std::collections::HashSet;
use std::future::{Ready, ready};
use std::rc::Rc;
use std::sync::Arc;

const PUBLIC_EXACT: &[&str] = &["/health", "/ping", "/login", "/setup", "/favicon.ico"];
const PUBLIC_PREFIXES: &[&str] = &["/static/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    None,
    Bearer,
    Session,
}

/// Stashed in request extensions by the gate; handlers and the role guard
/// read identity off this rather than re-deriving it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub auth_type: AuthType,
}

impl AuthContext {
    fn anonymous() -> Self {
        Self { user_id: 0, username: String::new(), role: Role::Viewer, auth_type: AuthType::None }
    }
}

pub(crate) fn is_public_path(path: &str) -> bool {
    PUBLIC_EXACT.contains(&path) || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn extract_bearer(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    parts.next().map(|rest| rest.trim().to_string())
}

pub struct RequestGate {
    mode: AuthMode,
    identity: IdentityStore,
}

impl RequestGate {
    pub fn new(mode: AuthMode, identity: IdentityStore) -> Self {
        Self { mode, identity }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestGateMiddleware { service: Rc::new(service), mode: self.mode, identity: self.identity.clone() }))
    }
}

pub struct RequestGateMiddleware<S> {
    service: Rc<S>,
    mode: AuthMode,
    identity: IdentityStore,
}

impl<S, B> Service<ServiceRequest> for RequestGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if self.mode == AuthMode::None {
            req.extensions_mut().insert(AuthContext::anonymous());
            return Box::pin(async move { service.call(req).await.map(ServiceResponse::map_into_left_body) });
        }

        if is_public_path(req.path()) {
            req.extensions_mut().insert(AuthContext::anonymous());
            return Box::pin(async move { service.call(req).await.map(ServiceResponse::map_into_left_body) });
        }

        let identity = self.identity.clone();
        let bearer = extract_bearer(&req);
        let session_handle = req.extensions().get::<Arc<SessionHandle>>().cloned();
        let is_api_shaped = Error::is_api_shaped(req.request());
        let path = req.path().to_string();

        Box::pin(async move {
            if let Some(token) = bearer {
                if let Ok(user) = identity.validate_token(&token).await {
                    req.extensions_mut().insert(AuthContext {
                        user_id: user.id,
                        username: user.username,
                        role: user.role,
                        auth_type: AuthType::Bearer,
                    });
                    return service.call(req).await.map(ServiceResponse::map_into_left_body);
                }
            }

            if let Some(handle) = session_handle {
                if let Some(payload) = handle.user() {
                    if let Ok(Some(user)) = identity.find_by_id(payload.user_id).await {
                        req.extensions_mut().insert(AuthContext {
                            user_id: user.id,
                            username: user.username,
                            role: user.role,
                            auth_type: AuthType::Session,
                        });
                        return service.call(req).await.map(ServiceResponse::map_into_left_body);
                    }
                }
            }

            let response = if is_api_shaped {
                HttpResponse::Unauthorized().json(serde_json::json!({ "error": "authentication required" }))
            } else {
                let next = sanitize_redirect_path(&path);
                HttpResponse::Found()
                    .insert_header((LOCATION, format!("/login?next={next}")))
                    .finish()
            };
            Ok(req.into_response(response).map_into_right_body())
        })
    }
}

/// 403 on role mismatch; a no-op in `none` mode (the gate never populates
/// a meaningful role there).
pub struct RequireRole {
    allowed: HashSet<Role>,
}

impl RequireRole {
    pub fn new(allowed: impl IntoIterator<Item = Role>) -> Self {
        Self { allowed: allowed.into_iter().collect() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequireRoleMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireRoleMiddleware { service: Rc::new(service), allowed: self.allowed.clone() }))
    }
}

pub struct RequireRoleMiddleware<S> {
    service: Rc<S>,
    allowed: HashSet<Role>,
}

impl<S, B> Service<ServiceRequest> for RequireRoleMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let ctx = req.extensions().get::<AuthContext>().cloned();
        let is_api_shaped = Error::is_api_shaped(req.request());

        let authorized = match &ctx {
            Some(c) if c.auth_type == AuthType::None => true,
            Some(c) => self.allowed.contains(&c.role),
            None => false,
        };

        Box::pin(async move {
            if authorized {
                return service.call(req).await.map(ServiceResponse::map_into_left_body);
            }
            let response = if is_api_shaped {
                HttpResponse::Forbidden().json(serde_json::json!({ "error": "forbidden" }))
            } else {
                HttpResponse::Forbidden().finish()
            };
            Ok(req.into_response(response).map_into_right_body())
        })
    }
}
