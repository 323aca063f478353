//! HTTP surface wiring (§6). Most routes are top-level rather than under an
//! `/api` scope, since the primary client is an HTML-ish browser flow; only
//! the bearer-token endpoints live under `/api`.

mod auth;
mod health;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure).configure(auth::configure);
}
