use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use v::response::respond_any;
use v::HealthCheck;

use crate::server::RelayServer;

pub const ROUTE_PATH: &str = "/v1/health";

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(relay_health)));
}

/// 中继运行概况（在线连接、房间数、存储是否持久）
/// Relay overview: online connections, rooms, storage durability
pub async fn relay_health(server: web::Data<Arc<RelayServer>>) -> impl Responder {
    let status = server.check_health().await;
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    respond_any(code, status)
}
