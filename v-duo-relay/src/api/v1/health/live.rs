use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use v::response::respond_any;

pub const ROUTE_PATH: &str = "/v1/health/live";

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(liveness)));
}

// 进程存活即返回 / Answers as long as the process runs
pub async fn liveness() -> impl Responder {
    respond_any(
        StatusCode::OK,
        serde_json::json!({
            "alive": true,
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": crate::domain::now_ms(),
        }),
    )
}
