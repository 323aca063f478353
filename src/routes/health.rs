//! Unauthenticated liveness endpoints (§6).

use actix_web::{HttpResponse, web};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).route("/ping", web::get().to(ping));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok", "service": "inkwell" }))
}

async fn ping() -> HttpResponse {
    HttpResponse::Ok().body("pong")
}
