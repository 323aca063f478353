//! Cookie load/commit/destroy protocol around the session store (4.D).
//!
//! The cookie must reach the client before the first byte of body and must
//! be emitted even for empty-body responses, so the Set-Cookie header is
//! computed from the handle's final state after the inner service runs,
//! then inserted on the response before it's returned to the client.

use super::store::{SessionPayload, SessionRecord, SessionStore};
use crate::error::Result;
use actix_web::{
    Error, HttpMessage,
    cookie::{Cookie, SameSite, time::Duration as CookieDuration},
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderValue, SET_COOKIE},
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::sync::{Arc, Mutex};

pub const COOKIE_NAME: &str = "session";

#[derive(Debug, Clone)]
pub struct SessionCookieConfig {
    pub secure: bool,
    pub lifetime_secs: i64,
}

enum HandleState {
    Unchanged(Option<SessionRecord>),
    Created(SessionRecord),
    Destroyed,
}

/// Per-request handle, stashed in request extensions; handlers read the
/// current user through it and call `create_session`/`destroy_session` to
/// mutate it. The middleware inspects the final state after the handler
/// returns to decide what (if anything) to commit.
pub struct SessionHandle {
    store: SessionStore,
    initial_token: Option<String>,
    state: Mutex<HandleState>,
}

impl SessionHandle {
    pub fn user(&self) -> Option<SessionPayload> {
        match &*self.state.lock().unwrap() {
            HandleState::Unchanged(Some(record)) => Some(record.payload.clone()),
            HandleState::Created(record) => Some(record.payload.clone()),
            HandleState::Unchanged(None) | HandleState::Destroyed => None,
        }
    }

    fn current_token(&self) -> Option<String> {
        match &*self.state.lock().unwrap() {
            HandleState::Unchanged(Some(record)) => Some(record.token.clone()),
            HandleState::Created(record) => Some(record.token.clone()),
            HandleState::Unchanged(None) | HandleState::Destroyed => None,
        }
    }

    /// The CSRF synchronizer token for this session: the session token
    /// itself, since it is already a high-entropy secret known only to the
    /// client holding the cookie and the server (4.G).
    pub fn csrf_token(&self) -> Option<String> {
        self.current_token()
    }

    /// Renew the token first (fixation defense), then persist the payload
    /// under the new token.
    pub async fn create_session(&self, payload: SessionPayload) -> Result<()> {
        if let Some(old) = self.initial_token.clone() {
            self.store.destroy(&old).await?;
        }
        let record = self.store.create(payload).await?;
        *self.state.lock().unwrap() = HandleState::Created(record);
        Ok(())
    }

    pub async fn destroy_session(&self) -> Result<()> {
        if let Some(token) = self.current_token() {
            self.store.destroy(&token).await?;
        }
        *self.state.lock().unwrap() = HandleState::Destroyed;
        Ok(())
    }
}

pub struct SessionMiddlewareFactory {
    store: SessionStore,
    config: SessionCookieConfig,
}

impl SessionMiddlewareFactory {
    pub fn new(store: SessionStore, config: SessionCookieConfig) -> Self {
        Self { store, config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SessionMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionMiddleware { service, store: self.store.clone(), config: self.config.clone() }))
    }
}

pub struct SessionMiddleware<S> {
    service: S,
    store: SessionStore,
    config: SessionCookieConfig,
}

impl<S, B> Service<ServiceRequest> for SessionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let store = self.store.clone();
        let config = self.config.clone();
        let token = req.cookie(COOKIE_NAME).map(|c| c.value().to_string());

        Box::pin(async move {
            let initial = match &token {
                Some(t) => store.load(t).await.map_err(actix_web::error::ErrorInternalServerError)?,
                None => None,
            };

            let handle = Arc::new(SessionHandle {
                store,
                initial_token: token.clone(),
                state: Mutex::new(HandleState::Unchanged(initial)),
            });
            req.extensions_mut().insert(handle.clone());

            let fut = self.service.call(req);
            let mut res = fut.await?;

            let set_cookie = {
                let state = handle.state.lock().unwrap();
                match &*state {
                    HandleState::Created(record) => Some(build_cookie(&config, &record.token, config.lifetime_secs)),
                    HandleState::Destroyed => Some(build_cookie(&config, "", 0)),
                    HandleState::Unchanged(_) => None,
                }
            };

            if let Some(cookie) = set_cookie {
                if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                    res.headers_mut().insert(SET_COOKIE, value);
                }
            }

            Ok(res)
        })
    }
}

fn build_cookie(config: &SessionCookieConfig, value: &str, max_age_secs: i64) -> Cookie<'static> {
    let mut builder = Cookie::build(COOKIE_NAME, value.to_string())
        .http_only(true)
        .path("/")
        .same_site(SameSite::Strict)
        .secure(config.secure);

    builder = if max_age_secs > 0 {
        builder.max_age(CookieDuration::seconds(max_age_secs))
    } else {
        builder.max_age(CookieDuration::seconds(0))
    };

    builder.finish()
}
