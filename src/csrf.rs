//! Synchronizer-token CSRF, with an explicit Bearer-token bypass (4.G).

use crate::error::Error;
use crate::gate::is_public_path;
use crate::identity::IdentityStore;
use crate::session::SessionHandle;
use actix_web::{
    HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::{
        Method,
        header::{AUTHORIZATION, LOCATION, REFERER},
    },
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::rc::Rc;
use std::sync::Arc;

pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const CSRF_FIELD: &str = "csrf_token";

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

fn extract_bearer(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = header.splitn(2, ' ');
    if !parts.next()?.eq_ignore_ascii_case("bearer") {
        return None;
    }
    parts.next().map(|rest| rest.trim().to_string())
}

fn extract_presented_token(req: &ServiceRequest) -> Option<String> {
    req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Synchronizer-token CSRF guard. `identity` is used to validate a bearer
/// token for the bypass path; `CsrfGuard::without_identity_check` exists
/// for embedding contexts with no identity store wired up, but is never
/// used by the default server wiring (see open question decisions).
pub struct CsrfGuard {
    identity: Option<IdentityStore>,
}

impl CsrfGuard {
    pub fn new(identity: IdentityStore) -> Self {
        Self { identity: Some(identity) }
    }

    /// Skips the bearer-bypass identity check entirely, trusting the
    /// presence of *any* `Authorization: Bearer` header as sufficient to
    /// exempt the request from CSRF. Kept as an explicit opt-in for
    /// embedding contexts without an identity store; default wiring always
    /// uses `new` so the bypass is gated on an actually-valid token.
    pub fn without_identity_check() -> Self {
        Self { identity: None }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CsrfGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = CsrfGuardMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CsrfGuardMiddleware { service: Rc::new(service), identity: self.identity.clone() }))
    }
}

pub struct CsrfGuardMiddleware<S> {
    service: Rc<S>,
    identity: Option<IdentityStore>,
}

impl<S, B> Service<ServiceRequest> for CsrfGuardMiddleware<S>
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

        // `/login` and `/setup` are reachable before any session exists, so
        // there is no session-bound token yet to synchronize against; both
        // are pre-authentication entry points with nothing else to forge.
        if is_safe_method(req.method()) || is_public_path(req.path()) {
            return Box::pin(async move { service.call(req).await.map(ServiceResponse::map_into_left_body) });
        }

        let bearer = extract_bearer(&req);
        let identity = self.identity.clone();
        let is_api_shaped = Error::is_api_shaped(req.request());
        let referer = req.headers().get(REFERER).and_then(|v| v.to_str().ok()).map(str::to_string);

        Box::pin(async move {
            if let Some(token) = bearer {
                let bypass = match &identity {
                    Some(store) => store.validate_token(&token).await.is_ok(),
                    None => true,
                };
                if bypass {
                    return service.call(req).await.map(ServiceResponse::map_into_left_body);
                }
            }

            let session_token = req
                .extensions()
                .get::<Arc<SessionHandle>>()
                .and_then(|handle| handle.csrf_token());
            let presented = extract_presented_token(&req);

            let valid = match (&session_token, &presented) {
                (Some(expected), Some(got)) => expected == got,
                _ => false,
            };

            if valid {
                return service.call(req).await.map(ServiceResponse::map_into_left_body);
            }

            let response = if is_api_shaped {
                HttpResponse::Forbidden().json(serde_json::json!({ "error": "csrf validation failed" }))
            } else if let Some(referer) = referer {
                HttpResponse::Found()
                    .insert_header((LOCATION, format!("{referer}?error=Session+expired%2C+please+try+again")))
                    .finish()
            } else {
                HttpResponse::Forbidden().body("<html><body>Session expired, please try again.</body></html>")
            };
            Ok(req.into_response(response).map_into_right_body())
        })
    }
}
